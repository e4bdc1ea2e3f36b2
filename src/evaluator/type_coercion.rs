use serde_json::Value;

use crate::core::variable_pool::Segment;
use crate::error::NodeError;

/// Convert an expected value to a number.
pub fn to_f64(value: &Value) -> Result<f64, NodeError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| NodeError::TypeError("Cannot convert number to f64".to_string())),
        Value::String(s) => s.trim().parse::<f64>().map_err(|e| {
            NodeError::TypeError(format!("Cannot convert '{}' to number: {}", s, e))
        }),
        _ => Err(NodeError::TypeError(format!(
            "Cannot convert {} to number",
            value
        ))),
    }
}

/// Numeric comparison of an actual segment against an expected value.
///
/// An absent actual value never satisfies a numeric comparison.
pub fn compare_numeric<F>(actual: &Segment, expected: &Value, compare_fn: F) -> Result<bool, NodeError>
where
    F: Fn(f64, f64) -> bool,
{
    if actual.is_none() {
        return Ok(false);
    }
    let a = actual.as_f64().ok_or_else(|| {
        NodeError::TypeError("Invalid actual value type: number".to_string())
    })?;
    let b = to_f64(expected)?;
    Ok(compare_fn(a, b))
}

/// Convert an expected value to its textual form.
pub fn to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The literals `"true"`/`"false"` become booleans when compared against a boolean.
pub fn coerce_bool_literal(actual: &Segment, expected: Value) -> Value {
    match (actual, &expected) {
        (Segment::Boolean(_), Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => expected,
        },
        _ => expected,
    }
}

/// Equality between one stored element and one expected element.
pub fn element_matches(element: &Segment, expected: &Value) -> bool {
    match (element, expected) {
        (Segment::String(s), Value::String(e)) => s == e,
        (Segment::Integer(_) | Segment::Float(_), Value::Number(n)) => {
            element.as_f64() == n.as_f64()
        }
        (Segment::Boolean(b), Value::Bool(e)) => b == e,
        _ => element.to_value() == *expected,
    }
}
