//! Version selection, graph expansion and constraint resolution.

mod graph;
mod resolver;
mod selector;

pub use graph::{DependencyGraph, DependencyNode, GraphBuilder};
pub use resolver::ConstraintResolver;
pub use selector::select_version;
