//! Rendering of the single-file Python artifact
//!
//! The artifact is the bootstrap runtime followed by the module table and
//! the alias table as dict literals, and a final call that runs the entry
//! module. Both tables are written as JSON objects of strings, which Python
//! reads as dict literals of string literals.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;

use crate::{module_path::ModulePath, resolver::AliasTable};

/// Python runtime embedded at the top of every artifact
pub const BOOTSTRAP: &str = include_str!("../resources/bootstrap.py");

/// Everything that goes into one artifact
#[derive(Debug)]
pub struct Artifact<'a> {
    pub entry: &'a ModulePath,
    pub sources: &'a IndexMap<ModulePath, String>,
    pub aliases: &'a AliasTable,
}

impl Artifact<'_> {
    /// The complete artifact text
    pub fn render(&self) -> Result<String> {
        let header = format!(
            "#!/usr/bin/env python3\n# Packed by pybunch {}: {} modules, entry point `{}`\n\n",
            env!("CARGO_PKG_VERSION"),
            self.sources.len(),
            self.entry
        );
        let tables = self.render_tables()?;
        debug!(
            "Rendered artifact for {} with {} modules",
            self.entry,
            self.sources.len()
        );
        Ok(format!("{header}{BOOTSTRAP}\n\n{tables}"))
    }

    /// The embedded tables and the entry call, without the bootstrap
    pub fn render_tables(&self) -> Result<String> {
        let mut sources: Vec<_> = self
            .sources
            .iter()
            .map(|(identity, source)| (identity, source.as_str()))
            .collect();
        sources.sort_by(|a, b| a.0.cmp(b.0));
        let sources: IndexMap<String, &str> = sources
            .into_iter()
            .map(|(identity, source)| (identity.dotted(), source))
            .collect();
        let aliases: IndexMap<String, String> = self
            .aliases
            .iter()
            .map(|(external, internal)| (external.dotted(), internal.dotted()))
            .collect();

        let sources =
            serde_json::to_string_pretty(&sources).context("Failed to encode module sources")?;
        let aliases =
            serde_json::to_string_pretty(&aliases).context("Failed to encode module aliases")?;
        let entry = serde_json::to_string(&self.entry.dotted())
            .context("Failed to encode the entry point")?;

        Ok(format!(
            "_PYBUNCH_SOURCES = {sources}\n\n_PYBUNCH_ALIASES = {aliases}\n\n\
             BundleRuntime(_PYBUNCH_SOURCES, _PYBUNCH_ALIASES).execute_entry({entry})\n"
        ))
    }
}
