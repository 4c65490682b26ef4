//! AST visitors used by the static analyses
//!
//! The closure analysis and the cycle report both work from the import
//! statements a module contains, wherever in the module they appear.

mod import_discovery;

pub use import_discovery::{DiscoveredImport, ExecutionContext, ImportDiscoveryVisitor};
