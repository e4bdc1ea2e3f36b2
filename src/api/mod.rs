//! Public API layer: launch a workflow and observe it.

mod handle;
mod runner;

pub use handle::WorkflowHandle;
pub use runner::{WorkflowRunner, WorkflowRunnerBuilder};
