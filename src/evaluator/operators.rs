//! Predicate functions, one per comparison operator.
//!
//! Every predicate receives the resolved actual value (`Segment::None` when
//! absent) and the already-rendered expected value.

use serde_json::Value;

use super::type_coercion::{compare_numeric, element_matches, to_f64, to_string};
use crate::core::variable_pool::Segment;
use crate::domain::model::ComparisonOperator;
use crate::error::NodeError;

fn invalid_actual(expected_type: &str) -> NodeError {
    NodeError::TypeError(format!("Invalid actual value type: {}", expected_type))
}

fn invalid_expected(expected_type: &str) -> NodeError {
    NodeError::TypeError(format!("Invalid expected value type: {}", expected_type))
}

fn expected_list(expected: &Value) -> Result<&Vec<Value>, NodeError> {
    expected.as_array().ok_or_else(|| invalid_expected("array"))
}

fn contains_item(actual: &Segment, item: &Value) -> Result<bool, NodeError> {
    if let Segment::String(s) = actual {
        return Ok(s.contains(to_string(item).as_str()));
    }
    let items = actual
        .array_items()
        .ok_or_else(|| invalid_actual("string or array"))?;
    Ok(items.iter().any(|el| element_matches(el, item)))
}

pub fn contains(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_empty() {
        return Ok(false);
    }
    contains_item(actual, expected)
}

pub fn not_contains(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_empty() {
        return Ok(true);
    }
    Ok(!contains_item(actual, expected)?)
}

pub fn start_with(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_empty() {
        return Ok(false);
    }
    let s = actual.as_str().ok_or_else(|| invalid_actual("string"))?;
    Ok(s.starts_with(to_string(expected).as_str()))
}

pub fn end_with(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_empty() {
        return Ok(false);
    }
    let s = actual.as_str().ok_or_else(|| invalid_actual("string"))?;
    Ok(s.ends_with(to_string(expected).as_str()))
}

fn exact_match(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    match actual {
        Segment::String(s) => Ok(*s == to_string(expected)),
        Segment::Boolean(b) => Ok(expected.as_bool() == Some(*b)),
        _ => Err(invalid_actual("string or boolean")),
    }
}

pub fn is(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_none() {
        return Ok(false);
    }
    exact_match(actual, expected)
}

pub fn is_not(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_none() {
        return Ok(false);
    }
    Ok(!exact_match(actual, expected)?)
}

pub fn empty(actual: &Segment) -> bool {
    actual.is_empty()
}

pub fn not_empty(actual: &Segment) -> bool {
    !actual.is_empty()
}

fn numeric_or_bool_equal(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if let Segment::Boolean(b) = actual {
        return match expected {
            Value::Bool(e) => Ok(b == e),
            other => Ok((*b as i64 as f64) == to_f64(other)?),
        };
    }
    compare_numeric(actual, expected, |a, b| a == b)
}

pub fn equal(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_none() {
        return Ok(false);
    }
    numeric_or_bool_equal(actual, expected)
}

pub fn not_equal(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_none() {
        return Ok(false);
    }
    Ok(!numeric_or_bool_equal(actual, expected)?)
}

pub fn greater_than(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    compare_numeric(actual, expected, |a, b| a > b)
}

pub fn less_than(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    compare_numeric(actual, expected, |a, b| a < b)
}

pub fn greater_or_equal(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    compare_numeric(actual, expected, |a, b| a >= b)
}

pub fn less_or_equal(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    compare_numeric(actual, expected, |a, b| a <= b)
}

pub fn null(actual: &Segment) -> bool {
    actual.is_none()
}

pub fn not_null(actual: &Segment) -> bool {
    !actual.is_none()
}

pub fn in_list(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_empty() {
        return Ok(false);
    }
    let list = expected_list(expected)?;
    Ok(list.iter().any(|item| element_matches(actual, item)))
}

pub fn not_in(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_empty() {
        return Ok(true);
    }
    let list = expected_list(expected)?;
    Ok(!list.iter().any(|item| element_matches(actual, item)))
}

pub fn all_of(actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    if actual.is_empty() {
        return Ok(false);
    }
    let list = expected_list(expected)?;
    for item in list {
        if !contains_item(actual, item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Dispatch one comparison.
pub fn evaluate(
    operator: ComparisonOperator,
    actual: &Segment,
    expected: &Value,
) -> Result<bool, NodeError> {
    match operator {
        ComparisonOperator::Contains => contains(actual, expected),
        ComparisonOperator::NotContains => not_contains(actual, expected),
        ComparisonOperator::StartWith => start_with(actual, expected),
        ComparisonOperator::EndWith => end_with(actual, expected),
        ComparisonOperator::Is => is(actual, expected),
        ComparisonOperator::IsNot => is_not(actual, expected),
        ComparisonOperator::Empty => Ok(empty(actual)),
        ComparisonOperator::NotEmpty => Ok(not_empty(actual)),
        ComparisonOperator::Equal => equal(actual, expected),
        ComparisonOperator::NotEqual => not_equal(actual, expected),
        ComparisonOperator::GreaterThan => greater_than(actual, expected),
        ComparisonOperator::LessThan => less_than(actual, expected),
        ComparisonOperator::GreaterOrEqual => greater_or_equal(actual, expected),
        ComparisonOperator::LessOrEqual => less_or_equal(actual, expected),
        ComparisonOperator::Null => Ok(null(actual)),
        ComparisonOperator::NotNull => Ok(not_null(actual)),
        ComparisonOperator::In => in_list(actual, expected),
        ComparisonOperator::NotIn => not_in(actual, expected),
        ComparisonOperator::AllOf => all_of(actual, expected),
        ComparisonOperator::Exists => Ok(!actual.is_none()),
        ComparisonOperator::NotExists => Ok(actual.is_none()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seg(v: Value) -> Segment {
        Segment::from_value(&v)
    }

    #[test]
    fn test_contains_string_and_array() {
        assert!(contains(&seg(json!("hello world")), &json!("world")).unwrap());
        assert!(contains(&seg(json!(["a", "b"])), &json!("b")).unwrap());
        assert!(contains(&seg(json!([1, 2])), &json!(2)).unwrap());
        assert!(!contains(&seg(json!("")), &json!("x")).unwrap());
        assert!(contains(&Segment::Integer(12), &json!("1")).is_err());
    }

    #[test]
    fn test_not_contains_empty_is_true() {
        assert!(not_contains(&Segment::None, &json!("x")).unwrap());
        assert!(not_contains(&seg(json!([])), &json!("x")).unwrap());
        assert!(!not_contains(&seg(json!("abc")), &json!("b")).unwrap());
    }

    #[test]
    fn test_start_end_with_requires_string() {
        assert!(start_with(&seg(json!("prefix_x")), &json!("prefix")).unwrap());
        assert!(end_with(&seg(json!("x.pdf")), &json!(".pdf")).unwrap());
        assert!(start_with(&seg(json!(["a"])), &json!("a")).is_err());
        assert!(!end_with(&Segment::None, &json!("a")).unwrap());
    }

    #[test]
    fn test_is_and_is_not() {
        assert!(is(&seg(json!("a")), &json!("a")).unwrap());
        assert!(is(&Segment::Boolean(true), &json!(true)).unwrap());
        assert!(!is(&Segment::None, &json!("a")).unwrap());
        assert!(!is_not(&Segment::None, &json!("a")).unwrap());
        assert!(is_not(&seg(json!("a")), &json!("b")).unwrap());
        assert!(is(&Segment::Integer(1), &json!("1")).is_err());
    }

    #[test]
    fn test_numeric_operators() {
        assert!(equal(&Segment::Integer(3), &json!("3")).unwrap());
        assert!(not_equal(&Segment::Float(3.5), &json!(3)).unwrap());
        assert!(greater_or_equal(&Segment::Integer(3), &json!(3)).unwrap());
        assert!(less_than(&Segment::Float(2.5), &json!("3")).unwrap());
        assert!(!equal(&Segment::None, &json!(0)).unwrap());
        assert!(greater_than(&seg(json!("9")), &json!(1)).is_err());
    }

    #[test]
    fn test_membership() {
        assert!(in_list(&seg(json!("b")), &json!(["a", "b"])).unwrap());
        assert!(not_in(&seg(json!("c")), &json!(["a", "b"])).unwrap());
        assert!(in_list(&seg(json!("b")), &json!("b")).is_err());
        assert!(all_of(&seg(json!(["a", "b", "c"])), &json!(["a", "c"])).unwrap());
        assert!(!all_of(&seg(json!(["a"])), &json!(["a", "c"])).unwrap());
    }

    #[test]
    fn test_null_exists_empty() {
        assert!(null(&Segment::None));
        assert!(not_null(&Segment::Integer(0)));
        assert!(empty(&Segment::Integer(0)));
        assert!(not_empty(&seg(json!({"k": 1}))));
        assert!(evaluate(ComparisonOperator::Exists, &Segment::Boolean(false), &Value::Null).unwrap());
        assert!(evaluate(ComparisonOperator::NotExists, &Segment::None, &Value::Null).unwrap());
    }
}
