//! Discovery of bundled modules on disk
//!
//! Every `*.py` file below a source root becomes one table entry. Its
//! identity is the file's path relative to the root with the suffix
//! dropped, optionally prefixed by a declared package name.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use ruff_python_stdlib::identifiers::is_identifier;
use walkdir::WalkDir;

use crate::module_path::ModulePath;

/// A directory whose Python files are bundled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    /// Prefix prepended to every identity found below `path`
    pub namespace: ModulePath,
    pub path: PathBuf,
}

impl SourceRoot {
    /// Files directly map to top-level names
    pub fn plain(path: impl Into<PathBuf>) -> Self {
        Self {
            namespace: ModulePath::root(),
            path: path.into(),
        }
    }

    /// Files map below the dotted `name`
    pub fn package(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            namespace: ModulePath::from_name(name),
            path: path.into(),
        }
    }
}

/// Identity of every discovered module and the file that holds it
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    files: IndexMap<ModulePath, PathBuf>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover every root in order
    pub fn discover(roots: &[SourceRoot]) -> Result<Self> {
        let mut map = Self::new();
        for root in roots {
            map.add_root(root)?;
        }
        map.files.sort_keys();
        debug!("Discovered {} modules in {} roots", map.len(), roots.len());
        Ok(map)
    }

    /// Add all Python files below `root`
    pub fn add_root(&mut self, root: &SourceRoot) -> Result<()> {
        if !root.path.is_dir() {
            bail!("Source root {} is not a directory", root.path.display());
        }
        debug!("Scanning {} as `{}`", root.path.display(), root.namespace);

        for entry in WalkDir::new(&root.path).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to scan {}", root.path.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension() != Some(OsStr::new("py")) {
                continue;
            }
            let relative = path
                .strip_prefix(&root.path)
                .with_context(|| format!("{} escapes {}", path.display(), root.path.display()))?;
            let Some(identity) = identity_for(relative) else {
                warn!(
                    "Skipping {}: its path is not a valid module name",
                    path.display()
                );
                continue;
            };
            self.insert(root.namespace.join(&identity), path.to_path_buf())?;
        }
        Ok(())
    }

    /// Register one file, rejecting a second file with the same identity
    pub fn insert(&mut self, identity: ModulePath, path: PathBuf) -> Result<()> {
        if let Some(existing) = self.files.get(&identity) {
            bail!(
                "Module `{identity}` is provided by both {} and {}",
                existing.display(),
                path.display()
            );
        }
        trace!("Module `{identity}` -> {}", path.display());
        self.files.insert(identity, path);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, identity: &ModulePath) -> bool {
        self.files.contains_key(identity)
    }

    pub fn path(&self, identity: &ModulePath) -> Option<&Path> {
        self.files.get(identity).map(PathBuf::as_path)
    }

    pub fn identities(&self) -> impl Iterator<Item = &ModulePath> {
        self.files.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModulePath, &Path)> {
        self.files.iter().map(|(identity, path)| (identity, path.as_path()))
    }

    /// Read the source text of every module
    pub fn read_sources(&self) -> Result<IndexMap<ModulePath, String>> {
        self.read_selected(self.files.keys())
    }

    /// Read the source text of the given modules, in the given order
    pub fn read_selected<'a, I>(&self, identities: I) -> Result<IndexMap<ModulePath, String>>
    where
        I: IntoIterator<Item = &'a ModulePath>,
    {
        identities
            .into_iter()
            .map(|identity| {
                let path = self
                    .path(identity)
                    .with_context(|| format!("Module `{identity}` was not discovered"))?;
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Ok((identity.clone(), source))
            })
            .collect()
    }
}

/// Identity of a file relative to its root, `None` when a segment is not a
/// Python identifier
fn identity_for(relative: &Path) -> Option<ModulePath> {
    let stem = relative.with_extension("");
    let mut parts = Vec::new();
    for component in stem.components() {
        let segment = component.as_os_str().to_str()?;
        if !is_identifier(segment) {
            return None;
        }
        parts.push(segment.to_owned());
    }
    (!parts.is_empty()).then(|| ModulePath::from_parts(parts))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, relative: &str, source: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, source).unwrap();
    }

    #[test]
    fn test_identity_for() {
        assert_eq!(
            identity_for(Path::new("app/db/models.py")),
            Some(ModulePath::from_name("app.db.models"))
        );
        assert_eq!(
            identity_for(Path::new("app/__init__.py")),
            Some(ModulePath::from_name("app.__init__"))
        );
        assert_eq!(identity_for(Path::new("my-scripts/run.py")), None);
        assert_eq!(identity_for(Path::new("app/2fa.py")), None);
    }

    #[test]
    fn test_discover_plain_and_package_roots() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let vendor = temp_dir.path().join("vendor");
        write(&src, "main.py", "import app");
        write(&src, "app/__init__.py", "");
        write(&src, "app/util.py", "");
        write(&src, "notes.txt", "not python");
        write(&vendor, "core.py", "");

        let map = ModuleMap::discover(&[
            SourceRoot::plain(&src),
            SourceRoot::package("third_party.lib", &vendor),
        ])
        .unwrap();

        let names: Vec<_> = map.identities().map(ModulePath::dotted).collect();
        assert_eq!(
            names,
            vec!["app.__init__", "app.util", "main", "third_party.lib.core"]
        );
        assert_eq!(
            map.path(&ModulePath::from_name("third_party.lib.core")),
            Some(vendor.join("core.py").as_path())
        );
    }

    #[test]
    fn test_duplicate_module_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("first");
        let second = temp_dir.path().join("second");
        write(&first, "shared.py", "");
        write(&second, "shared.py", "");

        let error =
            ModuleMap::discover(&[SourceRoot::plain(&first), SourceRoot::plain(&second)])
                .unwrap_err();
        assert!(error.to_string().contains("`shared` is provided by both"));
    }

    #[test]
    fn test_invalid_names_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "good.py", "");
        write(temp_dir.path(), "not-a-module.py", "");

        let map = ModuleMap::discover(&[SourceRoot::plain(temp_dir.path())]).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains(&ModulePath::from_name("good")));
    }

    #[test]
    fn test_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let error = ModuleMap::discover(&[SourceRoot::plain(temp_dir.path().join("missing"))])
            .unwrap_err();
        assert!(error.to_string().contains("is not a directory"));
    }

    #[test]
    fn test_read_sources() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "main.py", "print('hi')\n");
        let map = ModuleMap::discover(&[SourceRoot::plain(temp_dir.path())]).unwrap();
        let sources = map.read_sources().unwrap();
        assert_eq!(sources[&ModulePath::from_name("main")], "print('hi')\n");
    }
}
