//! Node executors and the registry the engine resolves them from.

pub mod control_flow;
pub mod executor;
pub mod flow;

pub use executor::{NodeContext, NodeExecutor, NodeExecutorRegistry};
