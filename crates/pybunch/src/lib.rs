//! Pack a tree of Python modules into one self-contained `.py` file

pub mod artifact;
pub mod closure;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod module_path;
pub mod project;
pub mod resolver;
pub mod runtime;
pub mod unit;
pub mod visitors;
