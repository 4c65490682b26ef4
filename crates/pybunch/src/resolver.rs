//! Import resolution against the bundle table
//!
//! Resolution is a pure decision procedure: given what is being imported,
//! from where, and which identities the bundle holds, it decides whether the
//! import belongs to the host (`External`), to a bundled leaf module, to a
//! bundled package, or names a local module the bundle does not contain.
//! Nothing here loads or executes code.

use indexmap::IndexMap;
use log::trace;
use rustc_hash::FxHashSet;

use crate::{
    error::{BundleError, Result},
    module_path::ModulePath,
};

/// Mapping from an external-facing prefix to the internal prefix it stands for
///
/// Lets bundled code import itself under a different absolute name than its
/// location in the bundle. Keys never overlap: no key is an ancestor of (or
/// equal to) another, which is checked when the table is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: IndexMap<ModulePath, ModulePath>,
}

impl AliasTable {
    /// Build a validated alias table
    pub fn new<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ModulePath, ModulePath)>,
    {
        let mut table: IndexMap<ModulePath, ModulePath> = IndexMap::new();
        for (external, internal) in entries {
            if let Some(existing) = table.keys().find(|key| {
                key.is_ancestor_of(&external) || external.is_ancestor_of(key)
            }) {
                return Err(BundleError::AmbiguousAliases {
                    first: existing.clone(),
                    second: external,
                });
            }
            table.insert(external, internal);
        }
        Ok(Self { entries: table })
    }

    /// Build from dotted names, e.g. `("ext.pkg", "")`
    pub fn from_names<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self::new(
            entries
                .into_iter()
                .map(|(external, internal)| {
                    (ModulePath::from_name(external), ModulePath::from_name(internal))
                }),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModulePath, &ModulePath)> {
        self.entries.iter()
    }

    /// Whether `path` is an alias key or a strict prefix of one; such names
    /// stand for packages that exist only through the alias
    pub fn is_alias_parent(&self, path: &ModulePath) -> bool {
        !path.is_empty() && self.entries.keys().any(|external| path.is_ancestor_of(external))
    }

    /// Replace the matching alias prefix of `target` with its internal prefix
    pub fn rewrite(&self, target: &ModulePath) -> Option<ModulePath> {
        let (external, internal) = self
            .entries
            .iter()
            .find(|(external, _)| external.is_ancestor_of(target))?;
        let rest = target.relative_to(external).ok()?;
        Some(internal.join(&rest))
    }
}

/// A bundled module an import resolved to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalModule {
    /// A module whose own table entry holds its code
    Leaf(ModulePath),
    /// A package whose code lives in its `__init__` child
    Intermediate(ModulePath),
}

impl LocalModule {
    /// The dotted identity the importer asked for
    pub fn identity(&self) -> &ModulePath {
        match self {
            Self::Leaf(path) | Self::Intermediate(path) => path,
        }
    }

    /// The table key whose unit supplies the executable source
    pub fn source_key(&self) -> ModulePath {
        match self {
            Self::Leaf(path) => path.clone(),
            Self::Intermediate(path) => path.initializer(),
        }
    }

    pub fn is_package(&self) -> bool {
        matches!(self, Self::Intermediate(_))
    }
}

/// Outcome of resolving one import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not ours: the host's own import machinery handles it
    External,
    /// Looks local but nothing in the bundle provides it
    MissingLocal(ModulePath),
    /// Served from the bundle
    Local(LocalModule),
}

/// Resolves import requests against a fixed set of bundled identities
#[derive(Debug, Clone, Default)]
pub struct ImportResolver {
    modules: FxHashSet<ModulePath>,
    top_level: FxHashSet<String>,
    aliases: AliasTable,
}

impl ImportResolver {
    pub fn new<'a, I>(modules: I, aliases: AliasTable) -> Self
    where
        I: IntoIterator<Item = &'a ModulePath>,
    {
        let modules: FxHashSet<ModulePath> = modules.into_iter().cloned().collect();
        let top_level = modules
            .iter()
            .filter_map(|module| module.first().map(str::to_owned))
            .collect();
        Self {
            modules,
            top_level,
            aliases,
        }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Classify an import of `target` at relative `level` (0 = absolute)
    /// issued by the module `importer`
    pub fn resolve(
        &self,
        target: &str,
        level: u32,
        importer: Option<&ModulePath>,
    ) -> Result<Resolution> {
        let target_path = ModulePath::from_name(target);

        let candidate = if level > 0 {
            let importer = importer.cloned().unwrap_or_default();
            let base = importer.strip_levels(level as usize).ok_or_else(|| {
                BundleError::RelativeImportTooDeep {
                    importer: importer.clone(),
                    target: target.to_owned(),
                    level,
                }
            })?;
            base.join(&target_path)
        } else if let Some(rewritten) = self.aliases.rewrite(&target_path) {
            trace!("Alias rewrote `{target}` to `{rewritten}`");
            rewritten
        } else if target_path
            .first()
            .is_some_and(|first| self.top_level.contains(first))
        {
            target_path
        } else {
            trace!("`{target}` is external to the bundle");
            return Ok(Resolution::External);
        };

        let resolution = self.classify(candidate);
        trace!("Resolved `{target}` (level {level}) to {resolution:?}");
        Ok(resolution)
    }

    /// Decide which table entry, if any, backs a fixed candidate identity
    pub fn classify(&self, candidate: ModulePath) -> Resolution {
        if self.modules.contains(&candidate) {
            Resolution::Local(LocalModule::Leaf(candidate))
        } else if self.modules.contains(&candidate.initializer()) {
            Resolution::Local(LocalModule::Intermediate(candidate))
        } else {
            Resolution::MissingLocal(candidate)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn paths(names: &[&str]) -> Vec<ModulePath> {
        names.iter().map(|name| ModulePath::from_name(name)).collect()
    }

    fn resolver(names: &[&str]) -> ImportResolver {
        ImportResolver::new(&paths(names), AliasTable::default())
    }

    #[test]
    fn test_external_import() {
        let resolver = resolver(&["app.main", "app.__init__"]);
        assert_eq!(resolver.resolve("os", 0, None).unwrap(), Resolution::External);
        assert_eq!(
            resolver.resolve("os.path", 0, None).unwrap(),
            Resolution::External
        );
    }

    #[test]
    fn test_leaf_and_intermediate() {
        let resolver = resolver(&["app.main", "app.__init__", "app.util.__init__"]);
        assert_eq!(
            resolver.resolve("app.main", 0, None).unwrap(),
            Resolution::Local(LocalModule::Leaf(ModulePath::from_name("app.main")))
        );
        assert_eq!(
            resolver.resolve("app", 0, None).unwrap(),
            Resolution::Local(LocalModule::Intermediate(ModulePath::from_name("app")))
        );
        assert_eq!(
            resolver.resolve("app.util", 0, None).unwrap(),
            Resolution::Local(LocalModule::Intermediate(ModulePath::from_name(
                "app.util"
            )))
        );
    }

    #[test]
    fn test_missing_local_is_authoritative() {
        let resolver = resolver(&["app.main"]);
        assert_eq!(
            resolver.resolve("app.missing", 0, None).unwrap(),
            Resolution::MissingLocal(ModulePath::from_name("app.missing"))
        );
    }

    #[test]
    fn test_relative_level_strips_trailing_segments() {
        let resolver = resolver(&["a.b.c", "a.b.d", "a.x"]);
        let importer = ModulePath::from_name("a.b.c");
        assert_eq!(
            resolver.resolve("d", 1, Some(&importer)).unwrap(),
            resolver.resolve("a.b.d", 0, None).unwrap()
        );
        assert_eq!(
            resolver.resolve("x", 2, Some(&importer)).unwrap(),
            Resolution::Local(LocalModule::Leaf(ModulePath::from_name("a.x")))
        );
    }

    #[test]
    fn test_relative_import_from_initializer_targets_own_package() {
        let resolver = resolver(&["pkg.__init__", "pkg.helper"]);
        let importer = ModulePath::from_name("pkg.__init__");
        assert_eq!(
            resolver.resolve("helper", 1, Some(&importer)).unwrap(),
            Resolution::Local(LocalModule::Leaf(ModulePath::from_name("pkg.helper")))
        );
    }

    #[test]
    fn test_relative_import_too_deep() {
        let resolver = resolver(&["a.b"]);
        let importer = ModulePath::from_name("a.b");
        assert_eq!(
            resolver.resolve("x", 3, Some(&importer)),
            Err(BundleError::RelativeImportTooDeep {
                importer,
                target: "x".to_owned(),
                level: 3,
            })
        );
    }

    #[test]
    fn test_alias_to_bundle_root() {
        let aliases = AliasTable::from_names([("ext.pkg", "")]).unwrap();
        let resolver = ImportResolver::new(&paths(&["sub", "main"]), aliases);
        assert_eq!(
            resolver.resolve("ext.pkg.sub", 0, None).unwrap(),
            resolver.resolve("sub", 0, None).unwrap()
        );
        assert_eq!(
            resolver.resolve("ext.other", 0, None).unwrap(),
            Resolution::External
        );
    }

    #[test]
    fn test_alias_takes_precedence_over_local_top_level() {
        let aliases = AliasTable::from_names([("app.legacy", "app.core")]).unwrap();
        let resolver = ImportResolver::new(&paths(&["app.core", "app.legacy"]), aliases);
        assert_eq!(
            resolver.resolve("app.legacy", 0, None).unwrap(),
            Resolution::Local(LocalModule::Leaf(ModulePath::from_name("app.core")))
        );
    }

    #[test]
    fn test_alias_parents() {
        let aliases = AliasTable::from_names([("ext.pkg", "")]).unwrap();
        assert!(aliases.is_alias_parent(&ModulePath::from_name("ext")));
        assert!(aliases.is_alias_parent(&ModulePath::from_name("ext.pkg")));
        assert!(!aliases.is_alias_parent(&ModulePath::from_name("ext.pkg.sub")));
        assert!(!aliases.is_alias_parent(&ModulePath::from_name("other")));
        assert!(!aliases.is_alias_parent(&ModulePath::root()));
    }

    #[test]
    fn test_overlapping_aliases_rejected() {
        let err = AliasTable::from_names([("ext", "a"), ("ext.pkg", "b")]).unwrap_err();
        assert_eq!(
            err,
            BundleError::AmbiguousAliases {
                first: ModulePath::from_name("ext"),
                second: ModulePath::from_name("ext.pkg"),
            }
        );
        assert!(AliasTable::from_names([("ext", "a"), ("ext", "b")]).is_err());
        assert!(AliasTable::from_names([("ext.a", "a"), ("ext.b", "b")]).is_ok());
    }

    #[test]
    fn test_source_key() {
        let leaf = LocalModule::Leaf(ModulePath::from_name("a.b"));
        let package = LocalModule::Intermediate(ModulePath::from_name("a"));
        assert_eq!(leaf.source_key(), ModulePath::from_name("a.b"));
        assert_eq!(package.source_key(), ModulePath::from_name("a.__init__"));
        assert!(package.is_package());
    }
}
