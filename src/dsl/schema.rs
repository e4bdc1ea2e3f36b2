use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::variable_pool::{Segment, Selector};

// ================================
// Graph config
// ================================

/// `{nodes: [...], edges: [...]}`: one workflow, including the bodies of
/// every loop and iteration it contains.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct GraphConfig {
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeConfig {
    pub id: String,
    pub data: NodeData,
}

/// Common node data. The `type` field determines the concrete config, which
/// is kept in `extra` and decoded by the node's executor.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeData {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_node_version")]
    pub version: String,
    #[serde(default)]
    pub error_strategy: Option<ErrorStrategyConfig>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
    /// Set on nodes that live inside an iteration body.
    #[serde(default)]
    pub iteration_id: Option<String>,
    /// Set on nodes that live inside a loop body.
    #[serde(default)]
    pub loop_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_node_version() -> String {
    "1".to_string()
}

impl NodeData {
    /// Node-specific config as a JSON object.
    pub fn config_value(&self) -> Value {
        Value::Object(
            self.extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EdgeConfig {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle")]
    pub source_handle: Option<String>,
}

// ================================
// Error Strategy
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ErrorStrategyConfig {
    #[serde(rename = "type")]
    pub strategy_type: ErrorStrategyType,
    #[serde(default)]
    pub default_value: Option<HashMap<String, Value>>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategyType {
    None,
    FailBranch,
    DefaultValue,
}

/// Handle followed by a node recovered through the fail-branch strategy.
pub const FAIL_BRANCH_HANDLE: &str = "fail-branch";
/// Handle of the success edge of a node that also has a fail branch.
pub const SUCCESS_BRANCH_HANDLE: &str = "success-branch";
/// Handle of an unconditional edge.
pub const SOURCE_HANDLE: &str = "source";

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default, alias = "retry_interval")]
    pub retry_interval_ms: u64,
}

// ================================
// Node Type Enum (Dify-compatible)
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Start,
    End,
    Answer,
    Llm,
    KnowledgeRetrieval,
    IfElse,
    Code,
    TemplateTransform,
    QuestionClassifier,
    HttpRequest,
    Tool,
    VariableAggregator,
    Loop,
    LoopStart,
    Iteration,
    IterationStart,
    ParameterExtractor,
    #[serde(rename = "assigner")]
    VariableAssigner,
    DocumentExtractor,
    ListOperator,
    Agent,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

impl NodeType {
    /// Nodes that run a child engine over a slice of the graph.
    pub fn is_container(&self) -> bool {
        matches!(self, NodeType::Loop | NodeType::Iteration)
    }

    /// Nodes whose outgoing edges carry run conditions.
    pub fn is_branch(&self) -> bool {
        matches!(self, NodeType::IfElse | NodeType::QuestionClassifier)
    }
}

// ================================
// Start / End / Answer configs
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct StartNodeData {
    #[serde(default)]
    pub variables: Vec<StartVariable>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StartVariable {
    pub variable: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default = "default_var_type")]
    pub var_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_var_type() -> String {
    "string".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EndNodeData {
    #[serde(default)]
    pub outputs: Vec<OutputVariable>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputVariable {
    pub variable: String,
    pub value_selector: Selector,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AnswerNodeData {
    pub answer: String,
}

// ================================
// Node Run Result (Dify-compatible)
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNodeExecutionStatus {
    Running,
    Succeeded,
    Failed,
    /// Failed, but recovered through the node's error strategy.
    Exception,
}

/// Well-known keys of [`NodeRunResult::metadata`].
pub mod metadata_keys {
    pub const TOTAL_TOKENS: &str = "total_tokens";
    pub const TOTAL_PRICE: &str = "total_price";
    pub const CURRENCY: &str = "currency";
    pub const STEPS: &str = "steps";
    pub const LOOP_ID: &str = "loop_id";
    pub const LOOP_INDEX: &str = "loop_index";
    pub const LOOP_DURATION_MAP: &str = "loop_duration_map";
    pub const ITERATION_ID: &str = "iteration_id";
    pub const ITERATION_INDEX: &str = "iteration_index";
    pub const ITERATION_DURATION_MAP: &str = "iteration_duration_map";
    pub const PARALLEL_MODE_RUN_ID: &str = "parallel_mode_run_id";
    pub const COMPLETED_REASON: &str = "completed_reason";
    pub const ERROR_STRATEGY: &str = "error_strategy";
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NodeRunResult {
    pub status: WorkflowNodeExecutionStatus,
    pub inputs: HashMap<String, Value>,
    pub process_data: HashMap<String, Value>,
    pub outputs: HashMap<String, Segment>,
    pub metadata: HashMap<String, Value>,
    /// Usage produced by this node itself. Container nodes report the usage
    /// of their bodies in `metadata` instead, since the body nodes were
    /// already accounted for.
    pub llm_usage: Option<LlmUsage>,
    pub edge_source_handle: String,
    pub error: Option<String>,
    pub retry_index: u32,
}

impl Default for NodeRunResult {
    fn default() -> Self {
        NodeRunResult {
            status: WorkflowNodeExecutionStatus::Succeeded,
            inputs: HashMap::new(),
            process_data: HashMap::new(),
            outputs: HashMap::new(),
            metadata: HashMap::new(),
            llm_usage: None,
            edge_source_handle: SOURCE_HANDLE.to_string(),
            error: None,
            retry_index: 0,
        }
    }
}

impl NodeRunResult {
    pub fn succeeded(outputs: HashMap<String, Segment>) -> Self {
        NodeRunResult {
            outputs,
            ..Default::default()
        }
    }

    pub fn outputs_as_values(&self) -> HashMap<String, Value> {
        self.outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct LlmUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub latency: f64,
}

impl LlmUsage {
    pub fn add(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.total_price += other.total_price;
        self.latency += other.latency;
        if self.currency.is_empty() {
            self.currency = other.currency.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_data_extra_and_defaults() {
        let node: NodeConfig = serde_json::from_value(json!({
            "id": "l1",
            "data": {
                "type": "loop",
                "title": "Loop",
                "loop_count": 3,
                "start_node_id": "ls",
                "error_strategy": {"type": "fail-branch"},
                "retry_config": {"max_retries": 2, "retry_interval": 10}
            }
        }))
        .unwrap();
        assert_eq!(node.data.node_type, NodeType::Loop);
        assert_eq!(node.data.version, "1");
        assert_eq!(node.data.config_value()["loop_count"], json!(3));
        assert_eq!(
            node.data.error_strategy.unwrap().strategy_type,
            ErrorStrategyType::FailBranch
        );
        assert_eq!(node.data.retry_config.unwrap().retry_interval_ms, 10);
    }

    #[test]
    fn test_node_type_display() {
        assert_eq!(NodeType::IfElse.to_string(), "if-else");
        assert_eq!(NodeType::VariableAssigner.to_string(), "assigner");
        assert!(NodeType::Loop.is_container());
        assert!(NodeType::IfElse.is_branch());
    }

    #[test]
    fn test_llm_usage_add() {
        let mut total = LlmUsage::default();
        total.add(&LlmUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            total_price: 0.5,
            currency: "USD".into(),
            latency: 0.1,
        });
        total.add(&LlmUsage {
            total_tokens: 4,
            ..Default::default()
        });
        assert_eq!(total.total_tokens, 7);
        assert_eq!(total.currency, "USD");
    }

    #[test]
    fn test_default_result_handle() {
        let r = NodeRunResult::default();
        assert_eq!(r.edge_source_handle, "source");
        assert_eq!(r.status, WorkflowNodeExecutionStatus::Succeeded);
    }
}
