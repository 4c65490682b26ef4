//! The bundle runtime: serves imports from the embedded module table
//!
//! Each identity moves through `Unloaded -> InProgress -> Loaded | Failed`.
//! `Loaded` and `Failed` are terminal, and a request for an identity that is
//! still `InProgress` is a circular import. A module is therefore executed
//! at most once per runtime, and importers never observe a half-initialized
//! namespace.

use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::{
    error::{BundleError, Result},
    host::{Host, ImportHook, ImportRequest, ModuleMetadata},
    module_path::{MAIN_SEGMENT, ModulePath},
    resolver::{AliasTable, ImportResolver, LocalModule, Resolution},
    unit::ModuleUnit,
};

/// Effective module name the entry module runs under
pub const MAIN_RUN_NAME: &str = "__main__";

/// Load state of one table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    InProgress,
    Loaded,
    Failed,
}

#[derive(Debug)]
enum LoadState<M> {
    InProgress,
    Loaded(M),
    Failed,
}

impl<M> LoadState<M> {
    const fn status(&self) -> LoadStatus {
        match self {
            Self::InProgress => LoadStatus::InProgress,
            Self::Loaded(_) => LoadStatus::Loaded,
            Self::Failed => LoadStatus::Failed,
        }
    }
}

/// Loader over a fixed table of bundled modules
///
/// The runtime is inert on its own: it only intercepts imports while one of
/// [`BundleRuntime::import_module`] or [`BundleRuntime::execute_entry`] is
/// running, by handing the host an [`ImportScope`] that borrows it.
pub struct BundleRuntime<H: Host> {
    units: IndexMap<ModulePath, Rc<ModuleUnit<H>>>,
    resolver: ImportResolver,
    states: FxHashMap<ModulePath, LoadState<H::Module>>,
    alias_parents: FxHashMap<ModulePath, H::Module>,
}

impl<H: Host> std::fmt::Debug for BundleRuntime<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleRuntime")
            .field("units", &self.units.keys().collect::<Vec<_>>())
            .field("aliases", self.resolver.aliases())
            .finish_non_exhaustive()
    }
}

impl<H: Host> BundleRuntime<H> {
    /// Build a runtime over `(identity, source)` pairs
    pub fn new<I, S>(sources: I, aliases: AliasTable) -> Self
    where
        I: IntoIterator<Item = (ModulePath, S)>,
        S: Into<Rc<str>>,
    {
        let mut units: IndexMap<ModulePath, Rc<ModuleUnit<H>>> = sources
            .into_iter()
            .map(|(identity, source)| {
                let unit = Rc::new(ModuleUnit::new(identity.clone(), source));
                (identity, unit)
            })
            .collect();
        units.sort_keys();
        let resolver = ImportResolver::new(units.keys(), aliases);
        debug!("Bundle runtime created with {} modules", units.len());
        Self {
            units,
            resolver,
            states: FxHashMap::default(),
            alias_parents: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, identity: &ModulePath) -> Option<&ModuleUnit<H>> {
        self.units.get(identity).map(AsRef::as_ref)
    }

    /// Load state of a table entry, `None` if it was never requested
    pub fn status(&self, identity: &ModulePath) -> Option<LoadStatus> {
        self.states.get(identity).map(LoadState::status)
    }

    /// Table keys of every module that finished executing
    pub fn loaded_modules(&self) -> impl Iterator<Item = &ModulePath> {
        self.states
            .iter()
            .filter(|(_, state)| matches!(state, LoadState::Loaded(_)))
            .map(|(identity, _)| identity)
    }

    /// Import `name` as an absolute import issued from outside the bundle
    pub fn import_module(&mut self, host: &mut H, name: &str) -> Result<H::Module> {
        let mut scope = ImportScope::new(self);
        scope.import(host, &ImportRequest::absolute(name))
    }

    /// Run the entry module `name` as the main program
    ///
    /// `name` may also name a package carrying a `__main__` module. Fails
    /// with [`BundleError::NonexistentEntrypoint`] before anything executes
    /// when the bundle holds neither.
    pub fn execute_entry(&mut self, host: &mut H, name: &str) -> Result<H::Module> {
        let entry = self.entry_identity(name)?;
        debug!("Executing entry module {entry}");
        let mut scope = ImportScope::new(self);
        scope.load(host, &LocalModule::Leaf(entry), Some(MAIN_RUN_NAME))
    }

    fn entry_identity(&self, name: &str) -> Result<ModulePath> {
        let path = ModulePath::from_name(name);
        if self.units.contains_key(&path) {
            return Ok(path);
        }
        let main = path.child(MAIN_SEGMENT);
        if self.units.contains_key(&main) {
            return Ok(main);
        }
        Err(BundleError::NonexistentEntrypoint(name.to_owned()))
    }

    /// Immediate children of `package`, in table order
    fn children_of(&self, package: &ModulePath) -> Vec<LocalModule> {
        let depth = package.len();
        self.units
            .keys()
            .filter(|key| package.is_ancestor_of(key))
            .filter_map(|key| {
                if key.len() == depth + 1 && !key.is_initializer() {
                    let name = key.name().ok()?;
                    (name != MAIN_SEGMENT).then(|| LocalModule::Leaf(key.clone()))
                } else if key.len() == depth + 2 && key.is_initializer() {
                    key.parent().ok().map(LocalModule::Intermediate)
                } else {
                    None
                }
            })
            .collect()
    }
}

/// The runtime's import hook, alive for one top-level runtime call
///
/// Holding the runtime mutably for its whole lifetime is what scopes the
/// interception: once the scope is dropped, nothing routes imports to the
/// bundle any more.
pub struct ImportScope<'rt, H: Host> {
    runtime: &'rt mut BundleRuntime<H>,
}

impl<H: Host> std::fmt::Debug for ImportScope<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportScope").finish_non_exhaustive()
    }
}

impl<'rt, H: Host> ImportScope<'rt, H> {
    fn new(runtime: &'rt mut BundleRuntime<H>) -> Self {
        trace!("Import hook installed");
        Self { runtime }
    }

    /// Load a bundled module, executing it on first request
    fn load(
        &mut self,
        host: &mut H,
        local: &LocalModule,
        run_name: Option<&str>,
    ) -> Result<H::Module> {
        let key = local.source_key();
        match self.runtime.states.get(&key) {
            Some(LoadState::Loaded(module)) => {
                trace!("Module {key} served from cache");
                return Ok(module.clone());
            }
            Some(LoadState::InProgress) => {
                debug!("Circular import of {}", local.identity());
                return Err(BundleError::CyclicImport(local.identity().clone()));
            }
            Some(LoadState::Failed) => {
                return Err(BundleError::PreviouslyFailed(local.identity().clone()));
            }
            None => {}
        }

        let unit = self
            .runtime
            .units
            .get(&key)
            .map(Rc::clone)
            .ok_or_else(|| BundleError::UnresolvedLocalImport(local.identity().dotted()))?;

        self.runtime
            .states
            .insert(key.clone(), LoadState::InProgress);
        let result = self.run(host, &unit, local, run_name);
        let state = match &result {
            Ok(module) => LoadState::Loaded(module.clone()),
            Err(_) => LoadState::Failed,
        };
        debug!("Module {key} is now {:?}", state.status());
        self.runtime.states.insert(key, state);
        result
    }

    fn run(
        &mut self,
        host: &mut H,
        unit: &ModuleUnit<H>,
        local: &LocalModule,
        run_name: Option<&str>,
    ) -> Result<H::Module> {
        let namespace = unit.create_namespace(host, run_name);
        if let LocalModule::Intermediate(package) = local {
            self.bind_children(host, package, &namespace)?;
        }
        unit.materialize_into(host, namespace, self)
    }

    /// Load every immediate child of `package` and bind it on `namespace`
    ///
    /// Child packages populate their own children when they load, so this
    /// descends one level per package rather than walking the subtree.
    fn bind_children(
        &mut self,
        host: &mut H,
        package: &ModulePath,
        namespace: &H::Module,
    ) -> Result<()> {
        for child in self.runtime.children_of(package) {
            // A child still executing is further up the current load stack,
            // e.g. an entry module inside the package; it is never exposed
            // half-initialized.
            if matches!(
                self.runtime.states.get(&child.source_key()),
                Some(LoadState::InProgress)
            ) {
                trace!("Not binding {} while it is still executing", child.identity());
                continue;
            }
            let module = self.load(host, &child, None)?;
            let name = child.identity().name()?;
            trace!("Binding {} on package {package}", child.identity());
            host.set_attribute(namespace, name, &module);
        }
        Ok(())
    }

    /// Empty package standing in for a name that exists only as a prefix of
    /// an alias, so that importing the alias's parents succeeds
    fn alias_parent(&mut self, host: &mut H, path: ModulePath) -> H::Module {
        if let Some(module) = self.runtime.alias_parents.get(&path) {
            return module.clone();
        }
        trace!("Creating alias parent package {path}");
        let name = path.dotted();
        let module = host.create_module(&ModuleMetadata {
            name: name.clone(),
            package: name,
            origin: format!("pybunch <alias {path}>"),
            is_package: true,
            identity: path.clone(),
        });
        self.runtime.alias_parents.insert(path, module.clone());
        module
    }
}

impl<H: Host> ImportHook<H> for ImportScope<'_, H> {
    fn import(&mut self, host: &mut H, request: &ImportRequest<'_>) -> Result<H::Module> {
        let resolution = self
            .runtime
            .resolver
            .resolve(request.name, request.level, request.importer)?;
        if request.level == 0
            && matches!(
                resolution,
                Resolution::External | Resolution::MissingLocal(_)
            )
        {
            let path = ModulePath::from_name(request.name);
            if self.runtime.resolver.aliases().is_alias_parent(&path) {
                return Ok(self.alias_parent(host, path));
            }
        }
        match resolution {
            Resolution::External => host.import_external(request.name),
            Resolution::MissingLocal(candidate) => {
                let name = if candidate.is_empty() {
                    request.name.to_owned()
                } else {
                    candidate.dotted()
                };
                Err(BundleError::UnresolvedLocalImport(name))
            }
            Resolution::Local(local) => self.load(host, &local, None),
        }
    }

    fn local_identity(&self, request: &ImportRequest<'_>) -> Result<Option<ModulePath>> {
        let resolution = self
            .runtime
            .resolver
            .resolve(request.name, request.level, request.importer)?;
        Ok(match resolution {
            Resolution::Local(local) => Some(local.identity().clone()),
            Resolution::External | Resolution::MissingLocal(_) => None,
        })
    }

    fn is_loading(&self, request: &ImportRequest<'_>) -> Result<bool> {
        let resolution = self
            .runtime
            .resolver
            .resolve(request.name, request.level, request.importer)?;
        Ok(match resolution {
            Resolution::Local(local) => matches!(
                self.runtime.states.get(&local.source_key()),
                Some(LoadState::InProgress)
            ),
            Resolution::External | Resolution::MissingLocal(_) => false,
        })
    }
}
