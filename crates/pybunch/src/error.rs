//! Error taxonomy for module resolution, loading and static analysis
//!
//! Every variant is fatal for the operation in progress: nothing here is
//! retried internally, and a failed pack or execution never produces a
//! partial result.

use ruff_python_parser::ParseError;
use ruff_text_size::Ranged;
use thiserror::Error;

use crate::module_path::ModulePath;

/// Errors raised by the bundling core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    /// Two alias keys overlap, so an import could be rewritten two ways
    #[error("module aliases must be distinct: `{first}` overlaps `{second}`")]
    AmbiguousAliases {
        first: ModulePath,
        second: ModulePath,
    },

    /// Identity arithmetic stepped above the root
    #[error("module path is empty")]
    EmptyPath,

    /// `relative_to` was asked for a path that is not a prefix
    #[error("`{path}` is not relative to `{ancestor}`")]
    NotAncestor {
        path: ModulePath,
        ancestor: ModulePath,
    },

    /// A relative import climbs past the top-level package
    #[error(
        "attempted relative import of `{target}` with level {level} beyond top-level package \
         from `{importer}`"
    )]
    RelativeImportTooDeep {
        importer: ModulePath,
        target: String,
        level: u32,
    },

    /// A name resolves into the bundle's namespace but no module holds it
    #[error("no bundled module named `{0}`")]
    UnresolvedLocalImport(String),

    /// A module was requested while it was still executing
    #[error("circular import detected while loading `{0}`")]
    CyclicImport(ModulePath),

    /// A bundled module failed to compile
    #[error("failed to compile bundled module `{identity}`: {diagnostic}")]
    SourceError {
        identity: ModulePath,
        diagnostic: String,
    },

    /// The requested entry point is not part of the bundle
    #[error("nonexistent entrypoint `{0}`")]
    NonexistentEntrypoint(String),

    /// A module whose first load failed was requested again
    #[error("module `{0}` failed to load earlier and cannot be imported")]
    PreviouslyFailed(ModulePath),

    /// The host could not import a non-bundled module
    #[error("no module named `{0}`")]
    ModuleNotFound(String),

    /// Executed source raised an error
    #[error("error while executing `{module}`: {message}")]
    Execution { module: String, message: String },
}

/// Result alias for the bundling core
pub type Result<T, E = BundleError> = std::result::Result<T, E>;

/// One-line description of a syntax error, with its 1-based line number
pub(crate) fn syntax_diagnostic(source: &str, error: &ParseError) -> String {
    let offset = usize::from(error.location.start());
    let line = source
        .get(..offset)
        .map_or(1, |prefix| prefix.matches('\n').count() + 1);
    format!("{} (line {line})", error.error)
}
