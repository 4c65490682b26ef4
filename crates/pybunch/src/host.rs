//! The host environment that compiles and executes bundled source
//!
//! The bundle runtime never touches a global import chain. Instead, every
//! call that executes bundled code receives an [`ImportHook`] explicitly;
//! the hook is the only route from executing source back into the bundle,
//! and it only exists for the duration of one top-level runtime call.

use crate::{error::Result, module_path::ModulePath};

/// An import statement (or equivalent) issued by executing code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest<'a> {
    /// Dotted target name, empty for `from . import x`
    pub name: &'a str,
    /// Relative level, 0 for absolute imports
    pub level: u32,
    /// Identity of the bundled module issuing the import, if any
    pub importer: Option<&'a ModulePath>,
}

impl<'a> ImportRequest<'a> {
    pub const fn absolute(name: &'a str) -> Self {
        Self {
            name,
            level: 0,
            importer: None,
        }
    }
}

/// Metadata a fresh module namespace is pre-populated with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    /// Effective module name (`__name__`), `__main__` for the entry module
    pub name: String,
    /// Package the module belongs to (`__package__`)
    pub package: String,
    /// Synthetic origin label (`__file__`)
    pub origin: String,
    /// Whether the namespace represents a package
    pub is_package: bool,
    /// Table key of the unit that supplies the code
    pub identity: ModulePath,
}

/// Resolution strategy handed to the host while bundled code executes
pub trait ImportHook<H: Host + ?Sized> {
    /// Resolve and load a module for the code currently running in `host`
    fn import(&mut self, host: &mut H, request: &ImportRequest<'_>) -> Result<H::Module>;

    /// Bundled identity `request` resolves to, without loading anything;
    /// `None` when the bundle does not serve it
    fn local_identity(&self, request: &ImportRequest<'_>) -> Result<Option<ModulePath>>;

    /// Whether the bundled module `request` names is executing right now,
    /// further up the current chain of imports
    fn is_loading(&self, request: &ImportRequest<'_>) -> Result<bool>;
}

/// A language runtime able to compile and run module source
pub trait Host {
    /// Compiled form of one module's source
    type Code;
    /// Handle to a module object; clones refer to the same module
    type Module: Clone;

    /// Compile source text. Syntax errors are reported as the diagnostic
    /// string; the caller attaches the module identity.
    fn compile(
        &mut self,
        identity: &ModulePath,
        source: &str,
    ) -> std::result::Result<Self::Code, String>;

    /// Create an empty module namespace carrying `metadata`
    fn create_module(&mut self, metadata: &ModuleMetadata) -> Self::Module;

    /// Bind `value` as attribute `name` of `module`
    fn set_attribute(&mut self, module: &Self::Module, name: &str, value: &Self::Module);

    /// Execute compiled code against `module`'s namespace. Every import the
    /// code performs goes through `hook`.
    fn execute(
        &mut self,
        code: &Self::Code,
        module: &Self::Module,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<()>;

    /// The host's own import mechanism, used for non-bundled modules
    fn import_external(&mut self, name: &str) -> Result<Self::Module>;
}
