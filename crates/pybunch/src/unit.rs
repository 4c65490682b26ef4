//! Lazily compiled, execute-once module units

use std::{cell::OnceCell, rc::Rc};

use log::debug;

use crate::{
    error::{BundleError, Result},
    host::{Host, ImportHook, ModuleMetadata},
    module_path::ModulePath,
};

/// One bundled module: its source text plus memoized compile and execute
/// results
///
/// The unit compiles its source at most once and executes it at most once;
/// later materializations hand back the cached module object.
pub struct ModuleUnit<H: Host> {
    identity: ModulePath,
    source: Rc<str>,
    compiled: OnceCell<Rc<H::Code>>,
    module: OnceCell<H::Module>,
}

impl<H: Host> std::fmt::Debug for ModuleUnit<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleUnit")
            .field("identity", &self.identity)
            .field("source_len", &self.source.len())
            .field("compiled", &self.compiled.get().is_some())
            .field("executed", &self.module.get().is_some())
            .finish()
    }
}

impl<H: Host> ModuleUnit<H> {
    pub fn new(identity: ModulePath, source: impl Into<Rc<str>>) -> Self {
        Self {
            identity,
            source: source.into(),
            compiled: OnceCell::new(),
            module: OnceCell::new(),
        }
    }

    pub fn identity(&self) -> &ModulePath {
        &self.identity
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether this unit is a package initializer
    pub fn is_initializer(&self) -> bool {
        self.identity.is_initializer()
    }

    /// Namespace this unit's code lives in: the package itself for an
    /// initializer, the containing package for a leaf
    pub fn parent(&self) -> ModulePath {
        self.identity.parent().unwrap_or_default()
    }

    /// Dotted name the module object is known by
    pub fn module_name(&self) -> String {
        if self.is_initializer() {
            self.parent().dotted()
        } else {
            self.identity.dotted()
        }
    }

    /// Package name recorded as the module's `__package__`
    pub fn package_name(&self) -> String {
        self.parent().dotted()
    }

    /// Label recorded as the module's origin for diagnostics
    pub fn origin(&self) -> String {
        format!("pybunch <{}>", self.identity)
    }

    /// Compiled form, compiling on first access
    pub fn compiled_form(&self, host: &mut H) -> Result<Rc<H::Code>> {
        if let Some(code) = self.compiled.get() {
            return Ok(Rc::clone(code));
        }
        debug!("Compiling bundled module {}", self.identity);
        let code = host
            .compile(&self.identity, &self.source)
            .map(Rc::new)
            .map_err(|diagnostic| BundleError::SourceError {
                identity: self.identity.clone(),
                diagnostic,
            })?;
        Ok(Rc::clone(self.compiled.get_or_init(|| code)))
    }

    /// The cached module object, if this unit has executed
    pub fn module(&self) -> Option<&H::Module> {
        self.module.get()
    }

    /// Metadata for a fresh namespace. `run_name` overrides the effective
    /// module name, which is how the entry module runs as `__main__`.
    pub fn metadata(&self, run_name: Option<&str>) -> ModuleMetadata {
        ModuleMetadata {
            name: run_name.map_or_else(|| self.module_name(), str::to_owned),
            package: self.package_name(),
            origin: self.origin(),
            is_package: self.is_initializer(),
            identity: self.identity.clone(),
        }
    }

    /// Create this unit's namespace without executing anything
    pub fn create_namespace(&self, host: &mut H, run_name: Option<&str>) -> H::Module {
        host.create_module(&self.metadata(run_name))
    }

    /// Execute the unit into `namespace` unless it already ran, caching the
    /// module object under this unit
    ///
    /// A failure leaves the cache empty; the runtime's load state machine
    /// keeps the unit from being retried.
    pub fn materialize_into(
        &self,
        host: &mut H,
        namespace: H::Module,
        hook: &mut dyn ImportHook<H>,
    ) -> Result<H::Module> {
        if let Some(module) = self.module.get() {
            return Ok(module.clone());
        }
        let code = self.compiled_form(host)?;
        debug!("Executing bundled module {}", self.identity);
        host.execute(&code, &namespace, hook)?;
        Ok(self.module.get_or_init(|| namespace).clone())
    }

    /// Create a fresh namespace and execute into it
    pub fn materialize(
        &self,
        host: &mut H,
        run_name: Option<&str>,
        hook: &mut dyn ImportHook<H>,
    ) -> Result<H::Module> {
        if let Some(module) = self.module.get() {
            return Ok(module.clone());
        }
        let namespace = self.create_namespace(host, run_name);
        self.materialize_into(host, namespace, hook)
    }
}
