//! A discovered project: entry point translation, closure selection and
//! packing

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info};

use crate::{
    artifact::Artifact,
    closure::compute_closure,
    discovery::{ModuleMap, SourceRoot},
    error::BundleError,
    host::Host,
    module_path::{MAIN_SEGMENT, ModulePath},
    resolver::AliasTable,
    runtime::BundleRuntime,
};

#[derive(Debug, Clone)]
pub struct Project {
    modules: ModuleMap,
    aliases: AliasTable,
}

impl Project {
    pub fn new(modules: ModuleMap, aliases: AliasTable) -> Self {
        Self { modules, aliases }
    }

    /// Discover `roots` into a project
    pub fn discover(roots: &[SourceRoot], aliases: AliasTable) -> Result<Self> {
        let modules = ModuleMap::discover(roots)?;
        Ok(Self::new(modules, aliases))
    }

    pub fn modules(&self) -> &ModuleMap {
        &self.modules
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Table key the entry point `name` runs: `name` itself, or the
    /// `__main__` module of the package `name`
    pub fn translate_entrypoint(&self, name: &str) -> Result<ModulePath, BundleError> {
        let path = ModulePath::from_name(name);
        if !path.is_empty() && self.modules.contains(&path) {
            return Ok(path);
        }
        let main = path.child(MAIN_SEGMENT);
        if self.modules.contains(&main) {
            return Ok(main);
        }
        Err(BundleError::NonexistentEntrypoint(name.to_owned()))
    }

    /// Modules statically reachable from the entry point, sorted
    pub fn dependencies(&self, entrypoint: &str) -> Result<Vec<ModulePath>> {
        let entry = self.translate_entrypoint(entrypoint)?;
        let sources = self.modules.read_sources()?;
        let closure = compute_closure(&entry, &sources, &self.aliases)
            .with_context(|| format!("Failed to analyze imports of `{entry}`"))?;
        Ok(closure.sorted())
    }

    /// Sources that go into the artifact: the whole table, or only the
    /// closure of the entry point
    pub fn select_sources(
        &self,
        entry: &ModulePath,
        statically_optimize: bool,
    ) -> Result<IndexMap<ModulePath, String>> {
        let sources = self.modules.read_sources()?;
        if !statically_optimize {
            return Ok(sources);
        }
        let closure = compute_closure(entry, &sources, &self.aliases)
            .with_context(|| format!("Failed to analyze imports of `{entry}`"))?;
        info!(
            "Static optimization kept {} of {} modules",
            closure.len(),
            sources.len()
        );
        Ok(sources
            .into_iter()
            .filter(|(identity, _)| closure.contains(identity))
            .collect())
    }

    /// Render the artifact that runs `entrypoint`
    pub fn pack(&self, entrypoint: &str, statically_optimize: bool) -> Result<String> {
        let entry = self.translate_entrypoint(entrypoint)?;
        debug!("Packing with entry module {entry}");
        let sources = self.select_sources(&entry, statically_optimize)?;
        Artifact {
            entry: &entry,
            sources: &sources,
            aliases: &self.aliases,
        }
        .render()
    }

    /// A runtime over every discovered module, for executing the project in
    /// process
    pub fn runtime<H: Host>(&self) -> Result<BundleRuntime<H>> {
        let sources = self.modules.read_sources()?;
        Ok(BundleRuntime::new(sources, self.aliases.clone()))
    }
}
