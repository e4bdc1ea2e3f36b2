//! Protocol-stable model types shared across layers.

mod condition;
mod flow;
mod segment_type;
mod selector;

pub use condition::{
    Case, ComparisonOperator, Condition, IterationErrorMode, LogicalOperator, SubCondition,
    SubVariableCondition,
};
pub use flow::{
    IfElseNodeConfig, IterationNodeConfig, LoopNodeConfig, LoopValueType, LoopVariable,
    DEFAULT_PARALLEL_NUMS,
};
pub use segment_type::SegmentType;
pub use selector::Selector;
