use thiserror::Error;

/// Node-level errors
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Input validation error: {0}")]
    InputValidationError(String),
    #[error("Timeout: node execution exceeded time limit")]
    Timeout,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Sub-graph error: {0}")]
    SubGraphError(String),
}

impl NodeError {
    /// Errors that abort before the node did any work. Retrying them is pointless.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NodeError::ConfigError(_)
                | NodeError::InputValidationError(_)
                | NodeError::SerializationError(_)
        )
    }

    /// Stable name of the variant, published as `error_type` by recovered nodes.
    pub fn error_type(&self) -> &'static str {
        match self {
            NodeError::ConfigError(_) => "ConfigError",
            NodeError::VariableNotFound(_) => "VariableNotFound",
            NodeError::ExecutionError(_) => "ExecutionError",
            NodeError::TypeError(_) => "TypeError",
            NodeError::TemplateError(_) => "TemplateError",
            NodeError::InputValidationError(_) => "InputValidationError",
            NodeError::Timeout => "Timeout",
            NodeError::SerializationError(_) => "SerializationError",
            NodeError::SubGraphError(_) => "SubGraphError",
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
