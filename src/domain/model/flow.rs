use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Case, Condition, IterationErrorMode, LogicalOperator, SegmentType, Selector};

/// Worker count used by parallel iterations that do not set `parallel_nums`.
pub const DEFAULT_PARALLEL_NUMS: usize = 10;

/// Configuration for the Loop node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoopNodeConfig {
    pub loop_count: usize,
    #[serde(default)]
    pub break_conditions: Vec<Condition>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    pub start_node_id: String,
    #[serde(default)]
    pub loop_variables: Vec<LoopVariable>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopValueType {
    #[default]
    Constant,
    Variable,
}

/// A variable owned by the loop node, visible to every iteration of the body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoopVariable {
    pub label: String,
    #[serde(default)]
    pub var_type: Option<SegmentType>,
    #[serde(default)]
    pub value_type: LoopValueType,
    /// A literal for `constant`, a selector for `variable`.
    #[serde(default)]
    pub value: Option<Value>,
}

/// Configuration for the Iteration node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterationNodeConfig {
    pub iterator_selector: Selector,
    pub output_selector: Selector,
    pub start_node_id: String,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default)]
    pub parallel_nums: Option<usize>,
    #[serde(default)]
    pub error_handle_mode: IterationErrorMode,
    #[serde(default = "default_flatten_output")]
    pub flatten_output: bool,
}

fn default_flatten_output() -> bool {
    true
}

/// Configuration for the If/Else node.
///
/// Older graphs put `conditions` and `logical_operator` at the top level
/// instead of using `cases`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IfElseNodeConfig {
    #[serde(default)]
    pub cases: Option<Vec<Case>>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub logical_operator: Option<LogicalOperator>,
}

impl IfElseNodeConfig {
    pub fn resolved_cases(&self) -> Vec<Case> {
        if let Some(cases) = &self.cases {
            return cases.clone();
        }
        match &self.conditions {
            Some(conditions) => vec![Case {
                case_id: "true".to_string(),
                logical_operator: self.logical_operator.unwrap_or_default(),
                conditions: conditions.clone(),
            }],
            None => Vec::new(),
        }
    }
}
