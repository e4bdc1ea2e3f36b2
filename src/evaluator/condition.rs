use serde::Serialize;
use serde_json::Value;

use super::operators;
use super::type_coercion::coerce_bool_literal;
use crate::core::variable_pool::{Segment, VariablePool};
use crate::domain::execution::FileAttribute;
use crate::domain::model::{
    ComparisonOperator, Condition, LogicalOperator, SubCondition, SubVariableCondition,
};
use crate::error::NodeError;

/// One evaluated condition, as recorded for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedInput {
    pub actual_value: Value,
    pub expected_value: Value,
    pub comparison_operator: ComparisonOperator,
}

/// Outcome of [`ConditionProcessor::process_conditions`].
///
/// `inputs` and `group_results` only cover the conditions that were actually
/// evaluated before short-circuiting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionCheckResult {
    pub inputs: Vec<EvaluatedInput>,
    pub group_results: Vec<bool>,
    pub final_result: bool,
}

/// Stateless evaluator of condition lists against a [`VariablePool`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionProcessor;

impl ConditionProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `conditions` in order, short-circuiting on the first `false`
    /// under `and` and the first `true` under `or`.
    pub fn process_conditions(
        &self,
        pool: &VariablePool,
        conditions: &[Condition],
        operator: LogicalOperator,
    ) -> Result<ConditionCheckResult, NodeError> {
        let mut inputs = Vec::with_capacity(conditions.len());
        let mut group_results = Vec::with_capacity(conditions.len());

        for condition in conditions {
            let (input, result) = self.evaluate_condition(pool, condition)?;
            inputs.push(input);
            group_results.push(result);

            match operator {
                LogicalOperator::And if !result => {
                    return Ok(ConditionCheckResult {
                        inputs,
                        group_results,
                        final_result: false,
                    });
                }
                LogicalOperator::Or if result => {
                    return Ok(ConditionCheckResult {
                        inputs,
                        group_results,
                        final_result: true,
                    });
                }
                _ => {}
            }
        }

        // No short-circuit: every condition agreed with the operator's identity.
        let final_result = match operator {
            LogicalOperator::And => true,
            LogicalOperator::Or => false,
        };
        Ok(ConditionCheckResult {
            inputs,
            group_results,
            final_result,
        })
    }

    fn evaluate_condition(
        &self,
        pool: &VariablePool,
        condition: &Condition,
    ) -> Result<(EvaluatedInput, bool), NodeError> {
        let operator = condition.comparison_operator;
        let actual = match pool.resolve(&condition.variable_selector) {
            Some(segment) => segment,
            None if operator.tolerates_missing() => Segment::None,
            None => {
                return Err(NodeError::VariableNotFound(
                    condition.variable_selector.to_string(),
                ))
            }
        };

        let expected = render_expected(pool, condition.value.clone().unwrap_or(Value::Null))?;
        let expected = coerce_bool_literal(&actual, expected);

        let result = match &actual {
            Segment::ArrayFile(files)
                if matches!(
                    operator,
                    ComparisonOperator::Contains
                        | ComparisonOperator::NotContains
                        | ComparisonOperator::AllOf
                ) =>
            {
                let sub = condition.sub_variable_condition.as_ref().ok_or_else(|| {
                    NodeError::ConfigError(format!(
                        "Sub variable condition is required for {}",
                        condition.variable_selector
                    ))
                })?;
                let files: Vec<Segment> = files
                    .iter()
                    .cloned()
                    .map(|f| Segment::File(Box::new(f)))
                    .collect();
                process_sub_conditions(&files, sub)?
            }
            _ => operators::evaluate(operator, &actual, &expected)?,
        };

        Ok((
            EvaluatedInput {
                actual_value: actual.to_value(),
                expected_value: expected,
                comparison_operator: operator,
            },
            result,
        ))
    }
}

/// Strings in the expected value may reference pool variables.
fn render_expected(pool: &VariablePool, expected: Value) -> Result<Value, NodeError> {
    match expected {
        Value::String(s) => Ok(Value::String(pool.render_template(&s)?)),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => pool.render_template(&s).map(Value::String),
                other => Ok(other),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

/// Evaluate file-attribute conditions element-wise over `files`.
fn process_sub_conditions(
    files: &[Segment],
    sub: &SubVariableCondition,
) -> Result<bool, NodeError> {
    let mut group_results = Vec::with_capacity(sub.conditions.len());
    for condition in &sub.conditions {
        group_results.push(evaluate_sub_condition(files, condition)?);
    }
    Ok(match sub.logical_operator {
        LogicalOperator::And => group_results.iter().all(|r| *r),
        LogicalOperator::Or => group_results.iter().any(|r| *r),
    })
}

fn evaluate_sub_condition(files: &[Segment], condition: &SubCondition) -> Result<bool, NodeError> {
    let mut expected = condition.value.clone().unwrap_or(Value::Null);
    if condition.key == FileAttribute::Extension {
        expected = normalize_extension(expected)?;
    }

    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let Segment::File(file) = file else {
            return Err(NodeError::TypeError("Expected a file element".to_string()));
        };
        let value = file.attribute(condition.key);
        results.push(operators::evaluate(
            condition.comparison_operator,
            &value,
            &expected,
        )?);
    }

    Ok(if condition.comparison_operator.is_negated() {
        results.iter().all(|r| *r)
    } else {
        results.iter().any(|r| *r)
    })
}

fn normalize_extension(expected: Value) -> Result<Value, NodeError> {
    match expected {
        Value::String(ext) if !ext.is_empty() && !ext.starts_with('.') => {
            Ok(Value::String(format!(".{}", ext)))
        }
        Value::String(ext) => Ok(Value::String(ext)),
        Value::Array(items) => items
            .into_iter()
            .map(normalize_extension)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => Err(NodeError::TypeError(
            "Expected value must be a string when key is extension".to_string(),
        )),
    }
}
