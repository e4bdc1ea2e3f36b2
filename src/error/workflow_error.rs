//! Workflow-level error types.

use super::NodeError;
use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("DSL parse error: {0}")]
    DslParseError(String),
    #[error("Graph build error: {0}")]
    GraphBuildError(String),
    #[error("Root node id {0} not found in the graph")]
    GraphNotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Node executor not found for type: {0}")]
    ExecutorNotFound(String),
    #[error("Max execution time {0}s reached")]
    ExecutionTimeout(u64),
    #[error("Max steps {0} reached")]
    MaxStepsExceeded(usize),
    #[error("No start node found")]
    NoStartNode,
    #[error("Cycle detected in graph")]
    CycleDetected,
    #[error("Workflow aborted: {0}")]
    Aborted(String),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecutionError { node_id: String, error: String },
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WorkflowError {
    /// Errors raised by a run-wide limit. These end the whole run and are
    /// never absorbed by a node's error handling.
    pub fn is_run_limit(&self) -> bool {
        matches!(
            self,
            WorkflowError::MaxStepsExceeded(_)
                | WorkflowError::ExecutionTimeout(_)
                | WorkflowError::Aborted(_)
        )
    }
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        assert_eq!(
            WorkflowError::DslParseError("x".into()).to_string(),
            "DSL parse error: x"
        );
        assert_eq!(
            WorkflowError::GraphNotFound("loop_start".into()).to_string(),
            "Root node id loop_start not found in the graph"
        );
        assert_eq!(
            WorkflowError::MaxStepsExceeded(100).to_string(),
            "Max steps 100 reached"
        );
        assert_eq!(
            WorkflowError::ExecutionTimeout(30).to_string(),
            "Max execution time 30s reached"
        );
        assert_eq!(
            WorkflowError::CycleDetected.to_string(),
            "Cycle detected in graph"
        );
        assert_eq!(
            WorkflowError::Aborted("reason".into()).to_string(),
            "Workflow aborted: reason"
        );
    }

    #[test]
    fn test_run_limit_errors() {
        assert!(WorkflowError::MaxStepsExceeded(5).is_run_limit());
        assert!(WorkflowError::ExecutionTimeout(5).is_run_limit());
        assert!(WorkflowError::Aborted("stop".into()).is_run_limit());
        assert!(!WorkflowError::NodeExecutionError {
            node_id: "n".into(),
            error: "boom".into(),
        }
        .is_run_limit());
    }

    #[test]
    fn test_workflow_error_node_execution_error() {
        let err = WorkflowError::NodeExecutionError {
            node_id: "node1".into(),
            error: "failed".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("node1"));
        assert!(msg.contains("failed"));
    }

    #[test]
    fn test_workflow_error_from_node_error() {
        let wf_err: WorkflowError = NodeError::Timeout.into();
        assert!(matches!(wf_err, WorkflowError::NodeError(_)));
        assert!(wf_err.to_string().contains("Timeout"));
    }
}
