//! Container node executors: Loop and Iteration.
//!
//! Both slice their body out of the workflow config with
//! [`NodeContext::body_graph`] and drive it with a child
//! [`GraphEngine`](crate::core::dispatcher::GraphEngine) per round.

pub mod iteration;
pub mod loop_node;

pub use iteration::IterationNodeExecutor;
pub use loop_node::LoopNodeExecutor;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{metadata_keys, LlmUsage, NodeRunResult};
use crate::error::NodeError;
use crate::graph::Graph;
use crate::nodes::executor::{NodeContext, NodeExecutor};

/// Entry node of a loop or iteration body. Does nothing.
pub struct PassThroughExecutor;

#[async_trait]
impl NodeExecutor for PassThroughExecutor {
    async fn execute(&self, _ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        Ok(NodeRunResult::default())
    }
}

/// Ids of the body nodes, minus the container itself.
pub(crate) fn body_node_ids(graph: &Graph, container_id: &str) -> Vec<String> {
    graph
        .node_ids()
        .iter()
        .filter(|id| id.as_str() != container_id)
        .cloned()
        .collect()
}

/// Drop every variable the body produced during one round.
pub(crate) fn clear_body_variables(pool: &mut VariablePool, body_node_ids: &[String]) {
    for node_id in body_node_ids {
        pool.remove_by_owner(node_id);
    }
}

/// Usage spent between two readings of the shared accumulator.
pub(crate) fn usage_metadata(before: &LlmUsage, after: &LlmUsage) -> HashMap<String, Value> {
    HashMap::from([
        (
            metadata_keys::TOTAL_TOKENS.to_string(),
            json!(after.total_tokens - before.total_tokens),
        ),
        (
            metadata_keys::TOTAL_PRICE.to_string(),
            json!(after.total_price - before.total_price),
        ),
        (metadata_keys::CURRENCY.to_string(), json!(after.currency)),
    ])
}

/// Wall time between two millisecond readings, in seconds.
pub(crate) fn elapsed_secs(start_millis: i64, end_millis: i64) -> f64 {
    (end_millis - start_millis).max(0) as f64 / 1000.0
}
