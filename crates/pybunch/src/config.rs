//! Layered configuration: `pybunch.toml` plus command-line overrides

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use etcetera::{BaseStrategy, choose_base_strategy};
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;

use crate::{discovery::SourceRoot, resolver::AliasTable};

/// File name looked up in the working directory and the user config dir
pub const CONFIG_FILE_NAME: &str = "pybunch.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Roots whose files map to top-level module names
    pub directories: Vec<PathBuf>,
    /// Declared package name -> root directory
    pub packages: IndexMap<String, PathBuf>,
    /// Dotted name of the module to run
    pub entrypoint: Option<String>,
    /// Bundle only what is statically reachable from the entry point
    pub statically_optimize: bool,
    /// External prefix -> internal prefix, `""` meaning the bundle root
    pub aliases: IndexMap<String, String>,
    /// Artifact path; stdout when unset
    pub output: Option<PathBuf>,
}

impl Config {
    /// Parse configuration text; relative paths are resolved against
    /// `base_dir`
    pub fn from_toml(text: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.rebase(base_dir);
        Ok(config)
    }

    /// Read a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml(&text, base_dir)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load the first configuration found: `explicit`, then `pybunch.toml`
    /// in the working directory, then the user config directory. Defaults
    /// when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            return Self::from_file(path);
        }
        for candidate in Self::search_paths() {
            if candidate.is_file() {
                debug!("Loading config from {}", candidate.display());
                return Self::from_file(&candidate);
            }
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Ok(strategy) = choose_base_strategy() {
            paths.push(strategy.config_dir().join("pybunch").join(CONFIG_FILE_NAME));
        }
        paths
    }

    fn rebase(&mut self, base_dir: &Path) {
        for directory in &mut self.directories {
            if directory.is_relative() {
                *directory = base_dir.join(&*directory);
            }
        }
        for path in self.packages.values_mut() {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
        if let Some(output) = &mut self.output
            && output.is_relative()
        {
            *output = base_dir.join(&*output);
        }
    }

    /// Source roots in declaration order: plain directories, then packages
    pub fn source_roots(&self) -> Vec<SourceRoot> {
        self.directories
            .iter()
            .map(SourceRoot::plain)
            .chain(
                self.packages
                    .iter()
                    .map(|(name, path)| SourceRoot::package(name, path)),
            )
            .collect()
    }

    /// The validated alias table
    pub fn alias_table(&self) -> Result<AliasTable> {
        Ok(AliasTable::from_names(
            self.aliases
                .iter()
                .map(|(external, internal)| (external.as_str(), internal.as_str())),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::module_path::ModulePath;

    #[test]
    fn test_parse_full_config() {
        let text = r#"
directories = ["src"]
entrypoint = "app.main"
statically-optimize = true
output = "dist/app.py"

[packages]
"vendor.lib" = "/opt/lib"

[aliases]
"ext.app" = "app"
"#;
        let config = Config::from_toml(text, Path::new("/project")).unwrap();
        assert_eq!(
            config,
            Config {
                directories: vec![PathBuf::from("/project/src")],
                packages: IndexMap::from([("vendor.lib".to_owned(), PathBuf::from("/opt/lib"))]),
                entrypoint: Some("app.main".to_owned()),
                statically_optimize: true,
                aliases: IndexMap::from([("ext.app".to_owned(), "app".to_owned())]),
                output: Some(PathBuf::from("/project/dist/app.py")),
            }
        );
        assert_eq!(
            config.source_roots()[1],
            SourceRoot::package("vendor.lib", "/opt/lib")
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let error = Config::from_toml("entry = \"main\"\n", Path::new(".")).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn test_overlapping_aliases_are_rejected() {
        let config = Config {
            aliases: IndexMap::from([
                ("ext".to_owned(), String::new()),
                ("ext.sub".to_owned(), "app".to_owned()),
            ]),
            ..Default::default()
        };
        let error = config.alias_table().unwrap_err();
        assert!(error.to_string().contains("must be distinct"));
    }

    #[test]
    fn test_alias_table() {
        let config = Config {
            aliases: IndexMap::from([("ext.pkg".to_owned(), String::new())]),
            ..Default::default()
        };
        let aliases = config.alias_table().unwrap();
        assert_eq!(
            aliases.rewrite(&ModulePath::from_name("ext.pkg.util")),
            Some(ModulePath::from_name("util"))
        );
    }

    #[test]
    fn test_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        std::fs::write(&path, "directories = [\"lib\"]\n").unwrap();
        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.directories, vec![temp_dir.path().join("lib")]);
    }
}
