use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Selector;
use crate::domain::execution::FileAttribute;

/// Comparison operators used by condition evaluation.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not contains", alias = "not_contains")]
    NotContains,
    #[serde(rename = "start with", alias = "start_with")]
    StartWith,
    #[serde(rename = "end with", alias = "end_with")]
    EndWith,
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "is not", alias = "is_not")]
    IsNot,
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "not empty", alias = "not_empty")]
    NotEmpty,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in", alias = "not_in")]
    NotIn,
    #[serde(rename = "all of", alias = "all_of")]
    AllOf,
    #[serde(rename = "=", alias = "equal")]
    Equal,
    #[serde(rename = "≠", alias = "not_equal", alias = "!=")]
    NotEqual,
    #[serde(rename = ">", alias = "greater_than")]
    GreaterThan,
    #[serde(rename = "<", alias = "less_than")]
    LessThan,
    #[serde(rename = "≥", alias = "greater_than_or_equal", alias = ">=")]
    GreaterOrEqual,
    #[serde(rename = "≤", alias = "less_than_or_equal", alias = "<=")]
    LessOrEqual,
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "not null", alias = "not_null")]
    NotNull,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "not exists", alias = "not_exists")]
    NotExists,
}

impl ComparisonOperator {
    /// Operators that are meaningful on an absent variable.
    pub fn tolerates_missing(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Null
                | ComparisonOperator::NotNull
                | ComparisonOperator::Exists
                | ComparisonOperator::NotExists
                | ComparisonOperator::Empty
                | ComparisonOperator::NotEmpty
        )
    }

    /// Operators spelled with "not". Element-wise results reduce with `all()` for these.
    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::NotContains
                | ComparisonOperator::IsNot
                | ComparisonOperator::NotEmpty
                | ComparisonOperator::NotIn
                | ComparisonOperator::NotNull
                | ComparisonOperator::NotExists
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// A single boolean test against one pool variable.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Condition {
    pub variable_selector: Selector,
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub sub_variable_condition: Option<SubVariableCondition>,
}

/// Element-wise filter applied to each file of an `array[file]` variable.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SubVariableCondition {
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<SubCondition>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SubCondition {
    pub key: FileAttribute,
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: Option<Value>,
}

/// One branch of an if/else node.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Error handling mode for iteration failures.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IterationErrorMode {
    #[default]
    #[serde(alias = "TERMINATED")]
    Terminated,
    #[serde(alias = "CONTINUE_ON_ERROR", alias = "continue_on_error")]
    ContinueOnError,
    #[serde(
        alias = "REMOVE_ABNORMAL_OUTPUT",
        alias = "remove_abnormal_output",
        alias = "remove-abnormal"
    )]
    RemoveAbnormalOutput,
}
