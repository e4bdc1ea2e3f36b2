//! Condition evaluation for branch, loop-break and filter decisions.

pub mod condition;
pub mod operators;
pub mod type_coercion;

pub use condition::{ConditionCheckResult, ConditionProcessor, EvaluatedInput};
