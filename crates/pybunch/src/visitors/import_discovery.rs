//! Import discovery visitor that finds all imports in a Python module,
//! including those nested within functions, classes, and conditional blocks.

use ruff_python_ast::{
    Stmt, StmtImport, StmtImportFrom,
    visitor::{Visitor, walk_stmt},
};

/// When the code containing an import runs relative to the module's own
/// execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// Runs while the module executes (module body, class bodies, branches)
    ModuleLevel,
    /// Runs only when an enclosing function is called
    Deferred,
}

/// An import discovered during AST traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImport {
    /// The module being imported, `None` for `from . import x`
    pub module_name: Option<String>,
    /// Names being imported (for from imports)
    pub names: Vec<String>,
    /// Import level for relative imports
    pub level: u32,
    /// Whether the import runs with the module or later
    pub context: ExecutionContext,
}

impl DiscoveredImport {
    /// `from x import *`
    pub fn is_star(&self) -> bool {
        self.names.iter().any(|name| name == "*")
    }
}

/// Visitor that collects every import statement of a module
#[derive(Debug, Default)]
pub struct ImportDiscoveryVisitor {
    imports: Vec<DiscoveredImport>,
    /// Number of function definitions enclosing the current statement
    function_depth: usize,
}

impl ImportDiscoveryVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the imports of a parsed module body
    pub fn discover(body: &[Stmt]) -> Vec<DiscoveredImport> {
        let mut visitor = Self::new();
        visitor.visit_body(body);
        visitor.into_imports()
    }

    /// Get all discovered imports
    pub fn into_imports(self) -> Vec<DiscoveredImport> {
        self.imports
    }

    fn context(&self) -> ExecutionContext {
        if self.function_depth > 0 {
            ExecutionContext::Deferred
        } else {
            ExecutionContext::ModuleLevel
        }
    }

    /// Record an import statement; one entry per alias
    fn record_import(&mut self, stmt: &StmtImport) {
        for alias in &stmt.names {
            self.imports.push(DiscoveredImport {
                module_name: Some(alias.name.to_string()),
                names: Vec::new(),
                level: 0,
                context: self.context(),
            });
        }
    }

    /// Record a from import statement
    fn record_import_from(&mut self, stmt: &StmtImportFrom) {
        self.imports.push(DiscoveredImport {
            module_name: stmt.module.as_ref().map(ToString::to_string),
            names: stmt.names.iter().map(|alias| alias.name.to_string()).collect(),
            level: stmt.level,
            context: self.context(),
        });
    }
}

impl<'a> Visitor<'a> for ImportDiscoveryVisitor {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Import(import_stmt) => {
                self.record_import(import_stmt);
            }
            Stmt::ImportFrom(import_from) => {
                self.record_import_from(import_from);
            }
            Stmt::FunctionDef(_) => {
                self.function_depth += 1;
                walk_stmt(self, stmt);
                self.function_depth -= 1;
                return;
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }
}
