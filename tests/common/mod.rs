#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowgraph::core::{FakeTimeProvider, Segment, Selector};
use flowgraph::{
    ExecutionStatus, GraphConfig, GraphEngineEvent, NodeContext, NodeError, NodeExecutor,
    NodeExecutorRegistry, NodeRunResult, NodeType, WorkflowHandle,
};

pub fn graph(value: Value) -> GraphConfig {
    serde_json::from_value(value).unwrap()
}

pub async fn collect_events(handle: &WorkflowHandle) -> Vec<GraphEngineEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

pub fn outputs(status: &ExecutionStatus) -> &HashMap<String, Value> {
    status
        .outputs()
        .unwrap_or_else(|| panic!("workflow did not finish successfully: {:?}", status))
}

pub fn loop_next_indices(events: &[GraphEngineEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            GraphEngineEvent::LoopRunNext { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

pub fn iteration_next_indices(events: &[GraphEngineEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            GraphEngineEvent::IterationRunNext { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

fn selector_from_config(ctx: &NodeContext, key: &str) -> Result<Selector, NodeError> {
    ctx.config
        .get(key)
        .and_then(Selector::parse_value)
        .ok_or_else(|| NodeError::ConfigError(format!("{} is required", key)))
}

/// Adds one to the integer at `target` and publishes the result as `value`.
pub struct AddOne;

#[async_trait]
impl NodeExecutor for AddOne {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let target = selector_from_config(ctx, "target")?;
        let mut pool = ctx.state.variable_pool.write();
        let next = match pool.get(&target) {
            Some(Segment::Integer(n)) => n + 1,
            _ => 1,
        };
        pool.add(&target, next);
        Ok(NodeRunResult::succeeded(HashMap::from([(
            "value".to_string(),
            Segment::Integer(next),
        )])))
    }
}

/// Doubles the number at `source`; fails when it equals `fail_on`.
pub struct Double;

#[async_trait]
impl NodeExecutor for Double {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let source = selector_from_config(ctx, "source")?;
        let item = ctx
            .state
            .variable_pool
            .read()
            .resolve(&source)
            .and_then(|s| s.as_f64())
            .ok_or_else(|| NodeError::VariableNotFound(source.to_string()))?;
        if let Some(delay) = ctx.config.get("delay_ms").and_then(Value::as_u64) {
            // later items finish first
            let weight = 10u64.saturating_sub(item as u64);
            tokio::time::sleep(Duration::from_millis(delay * weight)).await;
        }
        if ctx.config.get("fail_on").and_then(Value::as_f64) == Some(item) {
            return Err(NodeError::ExecutionError(format!("cannot double {}", item)));
        }
        Ok(NodeRunResult::succeeded(HashMap::from([(
            "result".to_string(),
            Segment::from_value(&json!(item as i64 * 2)),
        )])))
    }
}

/// Always fails.
pub struct Boom;

#[async_trait]
impl NodeExecutor for Boom {
    async fn execute(&self, _ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        Err(NodeError::ExecutionError("boom".to_string()))
    }
}

/// Fails until it has been called `succeed_after` times.
pub struct Flaky {
    pub calls: AtomicU32,
    pub succeed_after: u32,
}

#[async_trait]
impl NodeExecutor for Flaky {
    async fn execute(&self, _ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.succeed_after {
            return Err(NodeError::ExecutionError(format!("attempt {} failed", call)));
        }
        Ok(NodeRunResult::succeeded(HashMap::from([(
            "attempts".to_string(),
            Segment::Integer(call as i64),
        )])))
    }
}

/// Sleeps for a long time, so a run can be aborted while it waits.
pub struct Sleepy;

#[async_trait]
impl NodeExecutor for Sleepy {
    async fn execute(&self, _ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(NodeRunResult::default())
    }
}

/// Moves a fake clock forward by `secs` each time it runs.
pub struct Tick {
    pub clock: Arc<FakeTimeProvider>,
    pub secs: i64,
}

#[async_trait]
impl NodeExecutor for Tick {
    async fn execute(&self, _ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        self.clock.advance_secs(self.secs);
        Ok(NodeRunResult::default())
    }
}

/// Built-in executors plus `executor` under `node_type`.
pub fn registry_with(node_type: NodeType, executor: Arc<dyn NodeExecutor>) -> Arc<NodeExecutorRegistry> {
    let mut registry = NodeExecutorRegistry::with_builtins();
    registry.register(node_type, "1", executor);
    Arc::new(registry)
}
