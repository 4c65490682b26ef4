//! Runtime values of the reference interpreter

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;
use ruff_python_ast::Stmt;

use crate::{host::ModuleMetadata, module_path::ModulePath};

/// Shared handle to a module namespace
pub type ModuleRef = Rc<RefCell<ModuleObject>>;

/// A module namespace
#[derive(Debug)]
pub struct ModuleObject {
    name: String,
    identity: Option<ModulePath>,
    is_package: bool,
    /// Opaque stand-in for a module owned by the host's own import system
    is_external: bool,
    globals: IndexMap<String, Value>,
}

impl ModuleObject {
    /// Namespace for a bundled module, pre-populated with its metadata
    pub fn bundled(metadata: &ModuleMetadata) -> Self {
        let mut globals = IndexMap::new();
        globals.insert("__name__".to_owned(), Value::str(&metadata.name));
        globals.insert("__package__".to_owned(), Value::str(&metadata.package));
        globals.insert("__file__".to_owned(), Value::str(&metadata.origin));
        Self {
            name: metadata.name.clone(),
            identity: Some(metadata.identity.clone()),
            is_package: metadata.is_package,
            is_external: false,
            globals,
        }
    }

    /// Opaque module handed out for a host-resolved import
    pub fn external(name: &str) -> Self {
        let mut globals = IndexMap::new();
        globals.insert("__name__".to_owned(), Value::str(name));
        Self {
            name: name.to_owned(),
            identity: None,
            is_package: false,
            is_external: true,
            globals,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> Option<&ModulePath> {
        self.identity.as_ref()
    }

    pub const fn is_package(&self) -> bool {
        self.is_package
    }

    pub const fn is_external(&self) -> bool {
        self.is_external
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_owned(), value);
    }

    /// Public bindings, as copied by `from m import *`
    pub fn public_bindings(&self) -> Vec<(String, Value)> {
        self.globals
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// A user-defined function
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    /// Defining module; weak so module and function do not keep each other
    /// alive
    pub globals: Weak<RefCell<ModuleObject>>,
}

/// Functions provided without import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "print" => Some(Self::Print),
            _ => None,
        }
    }
}

/// A runtime value
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Module(ModuleRef),
    Function(Rc<Function>),
    Builtin(Builtin),
}

impl Value {
    pub fn str(text: &str) -> Self {
        Self::Str(Rc::from(text))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::Str(text) => !text.is_empty(),
            Self::Module(_) | Self::Function(_) | Self::Builtin(_) => true,
        }
    }

    pub fn as_module(&self) -> Option<&ModuleRef> {
        match self {
            Self::Module(module) => Some(module),
            _ => None,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Module(_) => "module",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Int(b)) | (Self::Int(b), Self::Bool(a)) => i64::from(*a) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(text) => f.write_str(text),
            Self::Module(module) => write!(f, "<module '{}'>", module.borrow().name()),
            Self::Function(function) => write!(f, "<function {}>", function.name),
            Self::Builtin(Builtin::Print) => f.write_str("<built-in function print>"),
        }
    }
}
