//! Execution status: the terminal state of a workflow run as seen by callers.

use serde_json::Value;
use std::collections::HashMap;

/// Execution status of a workflow
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    Running,
    Completed(HashMap<String, Value>),
    /// Finished, but at least one node recovered through its error strategy.
    PartialSucceeded {
        outputs: HashMap<String, Value>,
        exceptions_count: usize,
    },
    Failed(String),
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn outputs(&self) -> Option<&HashMap<String, Value>> {
        match self {
            ExecutionStatus::Completed(outputs)
            | ExecutionStatus::PartialSucceeded { outputs, .. } => Some(outputs),
            _ => None,
        }
    }
}
