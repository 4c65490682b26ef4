//! Static reachability over the bundle table
//!
//! The closure is computed from import statements alone, without executing
//! anything. It over-approximates: every import statement counts, including
//! those on branches or in functions that never run. Imports by computed
//! name (`importlib.import_module(name)`, `__import__`) are invisible to it.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};
use ruff_python_parser::parse_module;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{BundleError, Result, syntax_diagnostic},
    module_path::{MAIN_SEGMENT, ModulePath},
    resolver::AliasTable,
    visitors::{DiscoveredImport, ExecutionContext, ImportDiscoveryVisitor},
};

/// Reachable modules plus the import edges found between them
#[derive(Debug)]
pub struct Closure {
    entry: ModulePath,
    modules: IndexSet<ModulePath>,
    graph: DiGraph<ModulePath, ExecutionContext>,
    node_indices: FxHashMap<ModulePath, NodeIndex>,
}

impl Closure {
    fn new(entry: ModulePath) -> Self {
        Self {
            entry,
            modules: IndexSet::new(),
            graph: DiGraph::new(),
            node_indices: FxHashMap::default(),
        }
    }

    pub fn entry(&self) -> &ModulePath {
        &self.entry
    }

    /// Reachable table keys, in discovery order
    pub fn modules(&self) -> &IndexSet<ModulePath> {
        &self.modules
    }

    pub fn contains(&self, module: &ModulePath) -> bool {
        self.modules.contains(module)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Reachable table keys in identity order
    pub fn sorted(&self) -> Vec<ModulePath> {
        let mut modules: Vec<_> = self.modules.iter().cloned().collect();
        modules.sort();
        modules
    }

    /// Modules `module` loads when its import statements run, with the
    /// context each import runs in
    pub fn dependencies_of(&self, module: &ModulePath) -> Vec<(&ModulePath, ExecutionContext)> {
        let Some(&index) = self.node_indices.get(module) else {
            return Vec::new();
        };
        let mut dependencies: Vec<_> = self
            .graph
            .edges(index)
            .map(|edge| (&self.graph[edge.target()], *edge.weight()))
            .collect();
        dependencies.sort_by(|a, b| a.0.cmp(b.0));
        dependencies
    }

    /// Groups of modules that import each other while executing
    ///
    /// Loading any member of such a group fails with a circular import at
    /// run time. Imports inside function bodies are not part of a cycle.
    pub fn module_level_cycles(&self) -> Vec<Vec<ModulePath>> {
        let module_level = self.graph.filter_map(
            |_, module| Some(module.clone()),
            |_, context| (*context == ExecutionContext::ModuleLevel).then_some(()),
        );

        let mut cycles: Vec<Vec<ModulePath>> = tarjan_scc(&module_level)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&node| module_level.contains_edge(node, node))
            })
            .map(|component| {
                let mut members: Vec<_> = component
                    .into_iter()
                    .map(|node| module_level[node].clone())
                    .collect();
                members.sort();
                members
            })
            .collect();
        cycles.sort();
        cycles
    }

    fn node(&mut self, module: &ModulePath) -> NodeIndex {
        if let Some(&index) = self.node_indices.get(module) {
            return index;
        }
        let index = self.graph.add_node(module.clone());
        self.node_indices.insert(module.clone(), index);
        index
    }

    /// Importing a package binds its immediate children first, so each
    /// reachable initializer depends on its reachable children. The entry
    /// module is never bound this way: it is already running.
    fn add_child_bindings(&mut self) {
        let initializers: Vec<_> = self
            .modules
            .iter()
            .filter(|module| module.is_initializer())
            .cloned()
            .collect();
        for initializer in initializers {
            let Ok(package) = initializer.parent() else {
                continue;
            };
            let children: Vec<_> = self
                .modules
                .iter()
                .filter(|module| **module != self.entry)
                .filter(|module| is_immediate_child(&package, module))
                .cloned()
                .collect();
            for child in children {
                self.add_edge(&initializer, &child, ExecutionContext::ModuleLevel);
            }
        }
    }

    /// Record an edge; a module-level import wins over a deferred one
    fn add_edge(&mut self, from: &ModulePath, to: &ModulePath, context: ExecutionContext) {
        let from = self.node(from);
        let to = self.node(to);
        match self.graph.find_edge(from, to) {
            Some(edge) => {
                if context == ExecutionContext::ModuleLevel {
                    self.graph[edge] = context;
                }
            }
            None => {
                self.graph.add_edge(from, to, context);
            }
        }
    }
}

/// Computes the set of table entries reachable from an entry module
#[derive(Debug)]
pub struct ClosureAnalyzer<'t, S> {
    table: &'t IndexMap<ModulePath, S>,
    aliases: Option<&'t AliasTable>,
}

impl<'t, S: AsRef<str>> ClosureAnalyzer<'t, S> {
    pub fn new(table: &'t IndexMap<ModulePath, S>) -> Self {
        Self {
            table,
            aliases: None,
        }
    }

    /// Apply alias rewrites to absolute imports, matching what the runtime
    /// will do with them
    #[must_use]
    pub fn with_aliases(mut self, aliases: &'t AliasTable) -> Self {
        self.aliases = Some(aliases);
        self
    }

    /// Worklist fixpoint from `entry` over the table's import statements
    pub fn compute(&self, entry: &ModulePath) -> Result<Closure> {
        if !self.table.contains_key(entry) {
            return Err(BundleError::NonexistentEntrypoint(entry.dotted()));
        }

        let mut closure = Closure::new(entry.clone());
        let mut queue = VecDeque::new();
        let mut seen = FxHashSet::default();
        queue.push_back(entry.clone());
        seen.insert(entry.clone());

        while let Some(module) = queue.pop_front() {
            debug!("Closure: analyzing {module}");
            closure.node(&module);
            for import in self.imports_of(&module)? {
                let Some(base) = self.base_module(&module, &import) else {
                    continue;
                };
                for candidate in candidates(&base, &import) {
                    for key in self.reachable_keys(&candidate) {
                        if seen.insert(key.clone()) {
                            trace!("Closure: {module} reaches {key}");
                            queue.push_back(key);
                        }
                    }
                }
                for target in self.load_targets(&module, &base, &import, entry) {
                    closure.add_edge(&module, &target, import.context);
                }
            }
            closure.modules.insert(module);
        }

        closure.add_child_bindings();
        debug!(
            "Closure of {entry}: {} of {} modules",
            closure.len(),
            self.table.len()
        );
        Ok(closure)
    }

    fn imports_of(&self, module: &ModulePath) -> Result<Vec<DiscoveredImport>> {
        let source = self
            .table
            .get(module)
            .map(AsRef::as_ref)
            .ok_or_else(|| BundleError::UnresolvedLocalImport(module.dotted()))?;
        let parsed = parse_module(source).map_err(|error| BundleError::SourceError {
            identity: module.clone(),
            diagnostic: syntax_diagnostic(source, &error),
        })?;
        Ok(ImportDiscoveryVisitor::discover(&parsed.syntax().body))
    }

    /// The module an import statement names, with relative levels and
    /// aliases applied. `None` when a relative import climbs past the root.
    fn base_module(&self, importer: &ModulePath, import: &DiscoveredImport) -> Option<ModulePath> {
        let stated = ModulePath::from_name(import.module_name.as_deref().unwrap_or_default());
        if import.level > 0 {
            let Some(base) = importer.strip_levels(import.level as usize) else {
                warn!(
                    "Relative import of `{}` (level {}) in {importer} goes beyond the top-level \
                     package; ignoring it",
                    import.module_name.as_deref().unwrap_or_default(),
                    import.level
                );
                return None;
            };
            return Some(base.join(&stated));
        }
        Some(
            self.aliases
                .and_then(|aliases| aliases.rewrite(&stated))
                .unwrap_or(stated),
        )
    }

    /// Table keys a candidate pulls in: the candidate itself, and the
    /// initializer of the candidate and of each of its ancestors
    fn reachable_keys(&self, candidate: &ModulePath) -> Vec<ModulePath> {
        let mut keys = Vec::new();
        if !candidate.is_empty() && self.table.contains_key(candidate) {
            keys.push(candidate.clone());
        }
        for ancestor in candidate.lineage() {
            let initializer = ancestor.initializer();
            if self.table.contains_key(&initializer) {
                keys.push(initializer);
            }
        }
        keys
    }

    /// Table key backing `module` at run time, leaf first
    fn key_for(&self, module: &ModulePath) -> Option<ModulePath> {
        if module.is_empty() {
            return None;
        }
        if self.table.contains_key(module) {
            return Some(module.clone());
        }
        let initializer = module.initializer();
        self.table.contains_key(&initializer).then_some(initializer)
    }

    /// Table keys the runtime loads when the statement executes
    ///
    /// `import a.b` loads every prefix. `from m import n` loads `m` (every
    /// prefix of it when absolute), then `m.n` when that is a bundled
    /// module. A package enclosing the importer is already executing around
    /// it and is not loaded again, unless the importer is the entry module.
    fn load_targets(
        &self,
        importer: &ModulePath,
        base: &ModulePath,
        import: &DiscoveredImport,
        entry: &ModulePath,
    ) -> Vec<ModulePath> {
        if import.names.is_empty() {
            return self.prefix_keys(base);
        }
        let star = import.is_star();
        let enclosing =
            !star && importer != entry && base != importer && base.is_ancestor_of(importer);

        let mut targets = Vec::new();
        if !enclosing {
            if import.level == 0 {
                targets.extend(self.prefix_keys(base));
            } else {
                targets.extend(self.key_for(base));
            }
        }
        if !star {
            targets.extend(
                import
                    .names
                    .iter()
                    .filter_map(|name| self.key_for(&base.child(name))),
            );
        }
        targets
    }

    /// Keys backing each prefix of `module`, outermost first
    fn prefix_keys(&self, module: &ModulePath) -> Vec<ModulePath> {
        let mut prefixes: Vec<_> = module.lineage().collect();
        prefixes.reverse();
        prefixes
            .iter()
            .filter_map(|prefix| self.key_for(prefix))
            .collect()
    }
}

/// Candidate identities of an import: the stated module plus `module.name`
/// for every imported name
fn candidates(base: &ModulePath, import: &DiscoveredImport) -> Vec<ModulePath> {
    let mut candidates = vec![base.clone()];
    candidates.extend(
        import
            .names
            .iter()
            .filter(|name| *name != "*")
            .map(|name| base.child(name)),
    );
    candidates
}

/// Leaf `package.x` (other than `__main__`) or child package
/// `package.x.__init__`
fn is_immediate_child(package: &ModulePath, module: &ModulePath) -> bool {
    if !package.is_ancestor_of(module) {
        return false;
    }
    let depth = package.len();
    if module.is_initializer() {
        module.len() == depth + 2
    } else {
        module.len() == depth + 1 && module.name().is_ok_and(|name| name != MAIN_SEGMENT)
    }
}

/// Compute the closure of `entry` over `table` and warn about module-level
/// import cycles found along the way
pub fn compute_closure<S: AsRef<str>>(
    entry: &ModulePath,
    table: &IndexMap<ModulePath, S>,
    aliases: &AliasTable,
) -> Result<Closure> {
    let closure = ClosureAnalyzer::new(table)
        .with_aliases(aliases)
        .compute(entry)?;
    for cycle in closure.module_level_cycles() {
        let members: Vec<_> = cycle.iter().map(ModulePath::dotted).collect();
        warn!(
            "Modules import each other at module level and will fail with a circular import: {}",
            members.join(" -> ")
        );
    }
    Ok(closure)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn table(entries: &[(&str, &str)]) -> IndexMap<ModulePath, String> {
        entries
            .iter()
            .map(|(name, source)| (ModulePath::from_name(name), (*source).to_owned()))
            .collect()
    }

    fn closure_of(entry: &str, entries: &[(&str, &str)]) -> Vec<String> {
        let table = table(entries);
        let closure = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name(entry))
            .unwrap();
        closure.sorted().iter().map(ModulePath::dotted).collect()
    }

    #[test]
    fn test_transitive_closure_excludes_unreachable() {
        let modules = closure_of(
            "A",
            &[("A", "import B"), ("B", "import C"), ("C", "x = 1"), ("D", "x = 2")],
        );
        assert_eq!(modules, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_includes_ancestor_initializers() {
        let modules = closure_of(
            "main",
            &[
                ("main", "import app.db.models"),
                ("app.__init__", ""),
                ("app.db.__init__", ""),
                ("app.db.models", "x = 1"),
                ("app.db.unused", "x = 2"),
                ("app.web", "x = 3"),
            ],
        );
        assert_eq!(
            modules,
            vec!["app.__init__", "app.db.__init__", "app.db.models", "main"]
        );
    }

    #[test]
    fn test_from_import_of_submodule() {
        let modules = closure_of(
            "main",
            &[
                ("main", "from app import views, VERSION"),
                ("app.__init__", "VERSION = 1"),
                ("app.views", "x = 1"),
                ("app.other", "x = 2"),
            ],
        );
        assert_eq!(modules, vec!["app.__init__", "app.views", "main"]);
    }

    #[test]
    fn test_relative_imports_use_importer_ancestry() {
        let modules = closure_of(
            "app.api.handlers",
            &[
                ("app.__init__", ""),
                ("app.api.__init__", ""),
                ("app.api.handlers", "from . import schema\nfrom ..core import db"),
                ("app.api.schema", "x = 1"),
                ("app.core.__init__", ""),
                ("app.core.db", "x = 2"),
                ("app.core.cache", "x = 3"),
            ],
        );
        assert_eq!(
            modules,
            vec![
                "app.__init__",
                "app.api.__init__",
                "app.api.handlers",
                "app.api.schema",
                "app.core.__init__",
                "app.core.db",
            ]
        );
    }

    #[test]
    fn test_relative_import_beyond_root_is_ignored() {
        let modules = closure_of("tool", &[("tool", "from ... import nothing"), ("x", "")]);
        assert_eq!(modules, vec!["tool"]);
    }

    #[test]
    fn test_function_level_imports_are_included() {
        let modules = closure_of(
            "main",
            &[
                ("main", "def run():\n    import lazy\n    return lazy.x\n"),
                ("lazy", "x = 1"),
            ],
        );
        assert_eq!(modules, vec!["lazy", "main"]);
    }

    #[test]
    fn test_aliases_are_followed() {
        let table = table(&[("main", "import ext.pkg.util"), ("util", "x = 1")]);
        let aliases = AliasTable::from_names([("ext.pkg", "")]).unwrap();
        let closure = compute_closure(&ModulePath::from_name("main"), &table, &aliases).unwrap();
        assert!(closure.contains(&ModulePath::from_name("util")));
    }

    #[test]
    fn test_missing_entry() {
        let table = table(&[("main", "")]);
        let error = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name("missing"))
            .unwrap_err();
        assert_eq!(
            error,
            BundleError::NonexistentEntrypoint("missing".to_owned())
        );
    }

    #[test]
    fn test_syntax_error_names_module() {
        let table = table(&[("main", "import broken"), ("broken", "def (:\n")]);
        let error = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name("main"))
            .unwrap_err();
        assert!(matches!(
            error,
            BundleError::SourceError { identity, .. } if identity == ModulePath::from_name("broken")
        ));
    }

    #[test]
    fn test_module_level_cycle_is_reported() {
        let table = table(&[
            ("a", "import b"),
            ("b", "import a"),
            ("c", "def f():\n    import d\n"),
            ("d", "import c"),
            ("main", "import a\nimport c"),
        ]);
        let closure = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name("main"))
            .unwrap();
        assert_eq!(
            closure.module_level_cycles(),
            vec![vec![ModulePath::from_name("a"), ModulePath::from_name("b")]]
        );
        assert_eq!(
            closure.dependencies_of(&ModulePath::from_name("c")),
            vec![(&ModulePath::from_name("d"), ExecutionContext::Deferred)]
        );
    }

    #[test]
    fn test_package_child_binding_cycle() {
        let table = table(&[
            ("main", "import app"),
            ("app.__init__", "from . import models"),
            ("app.models", "import app.helpers"),
            ("app.helpers", "x = 1"),
        ]);
        let closure = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name("main"))
            .unwrap();
        assert_eq!(
            closure.module_level_cycles(),
            vec![vec![
                ModulePath::from_name("app.__init__"),
                ModulePath::from_name("app.models"),
            ]]
        );
    }

    #[test]
    fn test_from_import_cycle_through_package_initializer() {
        let table = table(&[
            ("a", "from app import views"),
            ("app.__init__", "import a"),
            ("app.views", ""),
            ("main", "import a"),
        ]);
        let closure = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name("main"))
            .unwrap();
        assert_eq!(
            closure.module_level_cycles(),
            vec![vec![
                ModulePath::from_name("a"),
                ModulePath::from_name("app.__init__"),
            ]]
        );
        assert_eq!(
            closure.dependencies_of(&ModulePath::from_name("a")),
            vec![
                (&ModulePath::from_name("app.__init__"), ExecutionContext::ModuleLevel),
                (&ModulePath::from_name("app.views"), ExecutionContext::ModuleLevel),
            ]
        );
    }

    #[test]
    fn test_child_importing_its_package_is_not_a_cycle() {
        let table = table(&[
            ("main", "import p"),
            ("p.__init__", ""),
            ("p.a", "from . import b"),
            ("p.b", "x = 2"),
        ]);
        let closure = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name("main"))
            .unwrap();
        assert!(closure.module_level_cycles().is_empty());
    }

    #[test]
    fn test_entry_inside_package_is_not_a_binding_cycle() {
        let table = table(&[("app.__init__", ""), ("app.main", "import app")]);
        let closure = ClosureAnalyzer::new(&table)
            .compute(&ModulePath::from_name("app.main"))
            .unwrap();
        assert!(closure.module_level_cycles().is_empty());
    }
}
