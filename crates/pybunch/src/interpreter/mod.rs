//! Reference host: a tree-walking interpreter for a small Python subset
//!
//! Enough of Python to drive the bundle runtime end to end: imports in all
//! their forms, assignments, functions, `if` chains, `print`, and simple
//! arithmetic. Modules the host resolves itself (standard library names and
//! explicitly registered ones) are opaque stubs: every attribute read on
//! them yields another stub.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use log::trace;
use ruff_python_ast::{
    CmpOp, Expr, ExprCall, ExprCompare, Number, Operator, Stmt, StmtFunctionDef, StmtIf,
    StmtImport, StmtImportFrom,
};
use ruff_python_parser::parse_module;
use ruff_python_stdlib::sys::is_known_standard_library;
use ruff_text_size::Ranged;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{BundleError, Result, syntax_diagnostic},
    host::{Host, ImportHook, ImportRequest, ModuleMetadata},
    module_path::ModulePath,
};

mod value;

pub use value::{Builtin, Function, ModuleObject, ModuleRef, Value};

/// Python minor version used for standard library detection
const PYTHON_MINOR: u8 = 12;

/// Nested calls allowed before interpreted code is stopped
const MAX_CALL_DEPTH: usize = 64;

/// Parsed module body
#[derive(Debug)]
pub struct CompiledModule {
    body: Vec<Stmt>,
}

impl CompiledModule {
    pub fn statement_count(&self) -> usize {
        self.body.len()
    }
}

/// Execution frame: module globals plus, inside a call, function locals
#[derive(Debug)]
struct Frame {
    module: ModuleRef,
    locals: Option<IndexMap<String, Value>>,
}

impl Frame {
    const fn module_level(module: ModuleRef) -> Self {
        Self {
            module,
            locals: None,
        }
    }

    fn module_name(&self) -> String {
        self.module.borrow().name().to_owned()
    }

    fn importer(&self) -> Option<ModulePath> {
        self.module.borrow().identity().cloned()
    }

    /// Dotted path of the module whose globals this frame runs in
    fn namespace_path(&self) -> Option<ModulePath> {
        let identity = self.importer()?;
        if identity.is_initializer() {
            identity.parent().ok()
        } else {
            Some(identity)
        }
    }

    fn bind(&mut self, name: &str, value: Value) {
        match &mut self.locals {
            Some(locals) => {
                locals.insert(name.to_owned(), value);
            }
            None => self.module.borrow_mut().set(name, value),
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.locals
            .as_ref()
            .and_then(|locals| locals.get(name).cloned())
            .or_else(|| self.module.borrow().get(name))
            .or_else(|| Builtin::lookup(name).map(Value::Builtin))
    }

    fn error(&self, message: impl Into<String>) -> BundleError {
        BundleError::Execution {
            module: self.module_name(),
            message: message.into(),
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
}

/// The reference interpreter
#[derive(Debug)]
pub struct Interpreter {
    call_depth: usize,
    registered: FxHashSet<String>,
    externals: FxHashMap<String, ModuleRef>,
    output: String,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            call_depth: 0,
            registered: FxHashSet::default(),
            externals: FxHashMap::default(),
            output: String::new(),
        }
    }

    /// Make a non-stdlib top-level module importable as an external stub
    #[must_use]
    pub fn with_external_module(mut self, name: &str) -> Self {
        self.registered.insert(name.to_owned());
        self
    }

    /// Everything `print` has written so far
    pub fn output(&self) -> &str {
        &self.output
    }

    fn exec_block(
        &mut self,
        body: &[Stmt],
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Flow> {
        for stmt in body {
            if let Flow::Return(value) = self.exec_stmt(stmt, frame, hook)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Flow> {
        match stmt {
            Stmt::Import(import) => self.exec_import(import, frame, hook)?,
            Stmt::ImportFrom(import_from) => self.exec_import_from(import_from, frame, hook)?,
            Stmt::Assign(assign) => {
                let value = self.eval(&assign.value, frame, hook)?;
                for target in &assign.targets {
                    self.assign(target, value.clone(), frame, hook)?;
                }
            }
            Stmt::FunctionDef(function_def) => Self::define_function(function_def, frame)?,
            Stmt::Return(ret) => {
                if frame.locals.is_none() {
                    return Err(frame.error("'return' outside function"));
                }
                let value = match &ret.value {
                    Some(expr) => self.eval(expr, frame, hook)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If(if_stmt) => return self.exec_if(if_stmt, frame, hook),
            Stmt::Expr(expr) => {
                self.eval(&expr.value, frame, hook)?;
            }
            Stmt::Pass(_) => {}
            other => {
                return Err(frame.error(format!(
                    "unsupported statement at byte offset {}",
                    usize::from(other.range().start())
                )));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_if(
        &mut self,
        if_stmt: &StmtIf,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Flow> {
        if self.eval(&if_stmt.test, frame, hook)?.truthy() {
            return self.exec_block(&if_stmt.body, frame, hook);
        }
        for clause in &if_stmt.elif_else_clauses {
            let taken = match &clause.test {
                Some(test) => self.eval(test, frame, hook)?.truthy(),
                None => true,
            };
            if taken {
                return self.exec_block(&clause.body, frame, hook);
            }
        }
        Ok(Flow::Normal)
    }

    /// `import a.b.c` binds `a`; `import a.b.c as x` binds `x` to `a.b.c`
    fn exec_import(
        &mut self,
        import: &StmtImport,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<()> {
        for alias in &import.names {
            let dotted = alias.name.as_str();
            let chain = self.import_chain(dotted, frame, hook)?;
            let (bound, module) = match &alias.asname {
                Some(asname) => (asname.as_str(), chain.last()),
                None => (dotted.split('.').next().unwrap_or(dotted), chain.first()),
            };
            let module = module.ok_or_else(|| frame.error("empty module name"))?;
            frame.bind(bound, Value::Module(Rc::clone(module)));
        }
        Ok(())
    }

    /// Import every prefix of an absolute dotted name, binding each child
    /// on its parent
    fn import_chain(
        &mut self,
        dotted: &str,
        frame: &Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Vec<ModuleRef>> {
        let importer = frame.importer();
        let path = ModulePath::from_name(dotted);
        let prefixes: Vec<ModulePath> = path.lineage().collect();
        let mut chain: Vec<ModuleRef> = Vec::with_capacity(prefixes.len());
        for prefix in prefixes.into_iter().rev() {
            let name = prefix.dotted();
            let request = ImportRequest {
                name: &name,
                level: 0,
                importer: importer.as_ref(),
            };
            let module = hook.import(self, &request)?;
            if let Some(parent) = chain.last()
                && !Rc::ptr_eq(parent, &module)
            {
                parent
                    .borrow_mut()
                    .set(prefix.name()?, Value::Module(Rc::clone(&module)));
            }
            chain.push(module);
        }
        Ok(chain)
    }

    fn exec_import_from(
        &mut self,
        import_from: &StmtImportFrom,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<()> {
        let module_name = import_from.module.as_ref().map_or("", |m| m.as_str());
        let level = import_from.level;

        if import_from.names.iter().any(|alias| alias.name.as_str() == "*") {
            let module = self.import_base(module_name, level, frame, hook)?;
            let bindings = module.borrow().public_bindings();
            for (name, value) in bindings {
                frame.bind(&name, value);
            }
            return Ok(());
        }

        for alias in &import_from.names {
            let name = alias.name.as_str();
            let value = self.import_name(module_name, name, level, frame, hook)?;
            let bound = alias.asname.as_ref().map_or(name, |asname| asname.as_str());
            frame.bind(bound, value);
        }
        Ok(())
    }

    /// The module a `from` import reads from
    fn import_base(
        &mut self,
        module_name: &str,
        level: u32,
        frame: &Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<ModuleRef> {
        if level == 0 {
            let chain = self.import_chain(module_name, frame, hook)?;
            return chain
                .last()
                .cloned()
                .ok_or_else(|| frame.error("empty module name"));
        }
        let importer = frame.importer();
        let request = ImportRequest {
            name: module_name,
            level,
            importer: importer.as_ref(),
        };
        hook.import(self, &request)
    }

    /// One name of a `from` import: import the base module, read the
    /// attribute, and fall back to the bundled submodule `base.name`
    ///
    /// A package that encloses the importer and is still executing is not
    /// requested again; its namespace is only at hand when the importer is
    /// the package's own initializer.
    fn import_name(
        &mut self,
        module_name: &str,
        name: &str,
        level: u32,
        frame: &Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Value> {
        let importer = frame.importer();
        let base_request = ImportRequest {
            name: module_name,
            level,
            importer: importer.as_ref(),
        };
        let base_identity = hook.local_identity(&base_request)?;
        let encloses_importer = base_identity
            .as_ref()
            .zip(importer.as_ref())
            .is_some_and(|(base, importer)| base != importer && base.is_ancestor_of(importer));

        let base = if encloses_importer && hook.is_loading(&base_request)? {
            (base_identity == frame.namespace_path()).then(|| Rc::clone(&frame.module))
        } else {
            Some(self.import_base(module_name, level, frame, hook)?)
        };
        if let Some(value) = base
            .as_ref()
            .and_then(|base| attribute_of(&Value::Module(Rc::clone(base)), name))
        {
            return Ok(value);
        }

        let submodule = if module_name.is_empty() {
            name.to_owned()
        } else {
            format!("{module_name}.{name}")
        };
        let request = ImportRequest {
            name: &submodule,
            level,
            importer: importer.as_ref(),
        };
        if hook.local_identity(&request)?.is_some() {
            let module = hook.import(self, &request)?;
            if let Some(base) = &base {
                base.borrow_mut().set(name, Value::Module(Rc::clone(&module)));
            }
            return Ok(Value::Module(module));
        }
        Err(frame.error(format!(
            "cannot import name '{name}' from '{}'",
            base.map_or_else(|| module_name.to_owned(), |base| base.borrow().name().to_owned())
        )))
    }

    fn assign(
        &mut self,
        target: &Expr,
        value: Value,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<()> {
        match target {
            Expr::Name(name) => {
                frame.bind(name.id.as_str(), value);
                Ok(())
            }
            Expr::Attribute(attribute) => {
                let object = self.eval(&attribute.value, frame, hook)?;
                let module = object.as_module().ok_or_else(|| {
                    frame.error(format!(
                        "cannot set attribute on '{}' object",
                        object.type_name()
                    ))
                })?;
                module.borrow_mut().set(attribute.attr.as_str(), value);
                Ok(())
            }
            _ => Err(frame.error("unsupported assignment target")),
        }
    }

    fn define_function(function_def: &StmtFunctionDef, frame: &mut Frame) -> Result<()> {
        let parameters = &function_def.parameters;
        if !function_def.decorator_list.is_empty()
            || parameters.vararg.is_some()
            || parameters.kwarg.is_some()
            || !parameters.kwonlyargs.is_empty()
        {
            return Err(frame.error(format!(
                "unsupported signature for function '{}'",
                function_def.name
            )));
        }
        let params = parameters
            .posonlyargs
            .iter()
            .chain(&parameters.args)
            .map(|param| param.parameter.name.as_str().to_owned())
            .collect();
        let function = Function {
            name: function_def.name.as_str().to_owned(),
            params,
            body: function_def.body.clone(),
            globals: Rc::downgrade(&frame.module),
        };
        frame.bind(
            function_def.name.as_str(),
            Value::Function(Rc::new(function)),
        );
        Ok(())
    }

    fn eval(
        &mut self,
        expr: &Expr,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Value> {
        match expr {
            Expr::NumberLiteral(number) => match &number.value {
                Number::Int(int) => int
                    .as_i64()
                    .map(Value::Int)
                    .ok_or_else(|| frame.error("integer literal out of range")),
                _ => Err(frame.error("only integer numbers are supported")),
            },
            Expr::StringLiteral(string) => Ok(Value::str(string.value.to_str())),
            Expr::BooleanLiteral(boolean) => Ok(Value::Bool(boolean.value)),
            Expr::NoneLiteral(_) => Ok(Value::None),
            Expr::Name(name) => frame
                .lookup(name.id.as_str())
                .ok_or_else(|| frame.error(format!("name '{}' is not defined", name.id))),
            Expr::Attribute(attribute) => {
                let object = self.eval(&attribute.value, frame, hook)?;
                attribute_of(&object, attribute.attr.as_str()).ok_or_else(|| {
                    frame.error(format!(
                        "'{}' object has no attribute '{}'",
                        object.type_name(),
                        attribute.attr
                    ))
                })
            }
            Expr::BinOp(binop) => {
                let left = self.eval(&binop.left, frame, hook)?;
                let right = self.eval(&binop.right, frame, hook)?;
                binary(frame, &left, binop.op, &right)
            }
            Expr::Compare(compare) => self.eval_compare(compare, frame, hook),
            Expr::Call(call) => self.eval_call(call, frame, hook),
            other => Err(frame.error(format!(
                "unsupported expression at byte offset {}",
                usize::from(other.range().start())
            ))),
        }
    }

    fn eval_compare(
        &mut self,
        compare: &ExprCompare,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Value> {
        let mut left = self.eval(&compare.left, frame, hook)?;
        for (op, comparator) in compare.ops.iter().zip(compare.comparators.iter()) {
            let right = self.eval(comparator, frame, hook)?;
            let holds = match op {
                CmpOp::Eq => left == right,
                CmpOp::NotEq => left != right,
                _ => return Err(frame.error("only == and != comparisons are supported")),
            };
            if !holds {
                return Ok(Value::Bool(false));
            }
            left = right;
        }
        Ok(Value::Bool(true))
    }

    fn eval_call(
        &mut self,
        call: &ExprCall,
        frame: &mut Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Value> {
        if !call.arguments.keywords.is_empty() {
            return Err(frame.error("keyword arguments are not supported"));
        }
        let callee = self.eval(&call.func, frame, hook)?;
        let mut args = Vec::with_capacity(call.arguments.args.len());
        for arg in &call.arguments.args {
            args.push(self.eval(arg, frame, hook)?);
        }

        match callee {
            Value::Builtin(Builtin::Print) => {
                let line: Vec<String> = args.iter().map(ToString::to_string).collect();
                self.output.push_str(&line.join(" "));
                self.output.push('\n');
                Ok(Value::None)
            }
            Value::Function(function) => self.call_function(&function, args, frame, hook),
            other => Err(frame.error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        caller: &Frame,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<Value> {
        if args.len() != function.params.len() {
            return Err(caller.error(format!(
                "{}() takes {} positional arguments but {} were given",
                function.name,
                function.params.len(),
                args.len()
            )));
        }
        let globals = function
            .globals
            .upgrade()
            .ok_or_else(|| caller.error(format!("module of '{}' is gone", function.name)))?;
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(caller.error("maximum recursion depth exceeded"));
        }
        let locals = function.params.iter().cloned().zip(args).collect();
        let mut frame = Frame {
            module: globals,
            locals: Some(locals),
        };
        self.call_depth += 1;
        let flow = self.exec_block(&function.body, &mut frame, hook);
        self.call_depth -= 1;
        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::None),
        }
    }
}

/// Attribute lookup; external stubs answer every name with a nested stub
fn attribute_of(object: &Value, name: &str) -> Option<Value> {
    let module = object.as_module()?.borrow();
    module.get(name).or_else(|| {
        module.is_external().then(|| {
            let stub = ModuleObject::external(&format!("{}.{name}", module.name()));
            Value::Module(Rc::new(RefCell::new(stub)))
        })
    })
}

fn binary(frame: &Frame, left: &Value, op: Operator, right: &Value) -> Result<Value> {
    let overflow = || frame.error("integer overflow");
    match (left, op, right) {
        (Value::Int(a), Operator::Add, Value::Int(b)) => {
            a.checked_add(*b).map(Value::Int).ok_or_else(overflow)
        }
        (Value::Int(a), Operator::Sub, Value::Int(b)) => {
            a.checked_sub(*b).map(Value::Int).ok_or_else(overflow)
        }
        (Value::Int(a), Operator::Mult, Value::Int(b)) => {
            a.checked_mul(*b).map(Value::Int).ok_or_else(overflow)
        }
        (Value::Str(a), Operator::Add, Value::Str(b)) => Ok(Value::str(&format!("{a}{b}"))),
        _ => Err(frame.error(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op.as_str(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

impl Host for Interpreter {
    type Code = CompiledModule;
    type Module = ModuleRef;

    fn compile(
        &mut self,
        identity: &ModulePath,
        source: &str,
    ) -> std::result::Result<CompiledModule, String> {
        let parsed = parse_module(source).map_err(|error| syntax_diagnostic(source, &error))?;
        let body = parsed.into_syntax().body;
        trace!("Compiled {identity} into {} statements", body.len());
        Ok(CompiledModule { body })
    }

    fn create_module(&mut self, metadata: &ModuleMetadata) -> ModuleRef {
        Rc::new(RefCell::new(ModuleObject::bundled(metadata)))
    }

    fn set_attribute(&mut self, module: &ModuleRef, name: &str, value: &ModuleRef) {
        module
            .borrow_mut()
            .set(name, Value::Module(Rc::clone(value)));
    }

    fn execute(
        &mut self,
        code: &CompiledModule,
        module: &ModuleRef,
        hook: &mut dyn ImportHook<Self>,
    ) -> Result<()> {
        let mut frame = Frame::module_level(Rc::clone(module));
        self.exec_block(&code.body, &mut frame, hook)?;
        Ok(())
    }

    fn import_external(&mut self, name: &str) -> Result<ModuleRef> {
        if let Some(module) = self.externals.get(name) {
            return Ok(Rc::clone(module));
        }
        let top_level = name.split('.').next().unwrap_or(name);
        if !self.registered.contains(top_level)
            && !is_known_standard_library(PYTHON_MINOR, top_level)
        {
            return Err(BundleError::ModuleNotFound(name.to_owned()));
        }
        trace!("Host resolved external module {name}");
        let module = Rc::new(RefCell::new(ModuleObject::external(name)));
        self.externals.insert(name.to_owned(), Rc::clone(&module));
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{resolver::AliasTable, runtime::BundleRuntime};

    fn run(source: &str) -> (Interpreter, Result<ModuleRef>) {
        let mut host = Interpreter::new();
        let mut runtime =
            BundleRuntime::new([(ModulePath::from_name("main"), source)], AliasTable::default());
        let result = runtime.execute_entry(&mut host, "main");
        (host, result)
    }

    #[test]
    fn test_bounded_recursion() {
        let (host, result) = run(
            "def count(n):\n    if n == 0:\n        return 0\n    return count(n - 1) + 1\nprint(count(10))\n",
        );
        result.unwrap();
        assert_eq!(host.output(), "10\n");
    }

    #[test]
    fn test_unbounded_recursion_is_an_error() {
        let (_, result) = run("def f():\n    return f()\nf()\n");
        assert_eq!(
            result.unwrap_err(),
            BundleError::Execution {
                module: "__main__".to_owned(),
                message: "maximum recursion depth exceeded".to_owned(),
            }
        );
    }

    #[test]
    fn test_from_import_of_missing_name() {
        let mut host = Interpreter::new();
        let mut runtime = BundleRuntime::new(
            [
                (ModulePath::from_name("main"), "from lib import nothing\n"),
                (ModulePath::from_name("lib"), "something = 1\n"),
            ],
            AliasTable::default(),
        );
        assert_eq!(
            runtime.execute_entry(&mut host, "main").unwrap_err(),
            BundleError::Execution {
                module: "__main__".to_owned(),
                message: "cannot import name 'nothing' from 'lib'".to_owned(),
            }
        );
    }
}
