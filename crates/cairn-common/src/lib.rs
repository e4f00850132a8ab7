//! Shared vocabulary for the Cairn runtime crates.

pub mod error;
pub mod module_graph;

pub use error::{DispatchError, LoadError};
pub use module_graph::{topological_sort, CycleError, ModuleGraph, ModuleId};
