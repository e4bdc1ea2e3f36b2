//! Loop Node executor.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{body_node_ids, clear_body_variables, elapsed_secs, usage_metadata};
use crate::core::event_bus::GraphEngineEvent;
use crate::core::variable_pool::{Segment, Selector, VariablePool};
use crate::domain::model::{LoopNodeConfig, LoopValueType, LoopVariable};
use crate::dsl::schema::{metadata_keys, NodeRunResult};
use crate::error::NodeError;
use crate::evaluator::ConditionProcessor;
use crate::nodes::executor::{NodeContext, NodeExecutor};

pub const LOOP_COMPLETED: &str = "loop_completed";
pub const LOOP_BREAK: &str = "loop_break";

/// Runs its body up to `loop_count` times, stopping early once the break
/// conditions hold.
pub struct LoopNodeExecutor {
    processor: ConditionProcessor,
}

impl Default for LoopNodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopNodeExecutor {
    pub fn new() -> Self {
        Self {
            processor: ConditionProcessor::new(),
        }
    }

    /// A break condition that references a variable not yet in the pool is
    /// not satisfied.
    fn should_break(
        &self,
        loop_id: &str,
        pool: &VariablePool,
        config: &LoopNodeConfig,
    ) -> Result<bool, NodeError> {
        if config.break_conditions.is_empty() {
            return Ok(false);
        }
        if let Some(missing) = config
            .break_conditions
            .iter()
            .find(|c| !pool.has(&c.variable_selector))
        {
            warn!(
                loop_id = %loop_id,
                selector = %missing.variable_selector,
                "break condition variable not available yet"
            );
            return Ok(false);
        }
        let check = self.processor.process_conditions(
            pool,
            &config.break_conditions,
            config.logical_operator,
        )?;
        Ok(check.final_result)
    }
}

fn initial_value(pool: &VariablePool, var: &LoopVariable) -> Result<Segment, NodeError> {
    let raw = var.value.clone().unwrap_or(Value::Null);
    match var.value_type {
        LoopValueType::Constant => Ok(Segment::from_value(&raw)),
        LoopValueType::Variable => {
            let selector = Selector::parse_value(&raw).ok_or_else(|| {
                NodeError::ConfigError(format!("Invalid selector for loop variable {}", var.label))
            })?;
            pool.resolve(&selector)
                .ok_or_else(|| NodeError::VariableNotFound(selector.to_string()))
        }
    }
}

#[async_trait]
impl NodeExecutor for LoopNodeExecutor {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let config: LoopNodeConfig = ctx.parse_config()?;
        let loop_id = ctx.node_id.as_str();
        let loop_count = config.loop_count.min(ctx.runtime.config.max_loop_count);
        let graph = ctx.body_graph(&config.start_node_id)?;
        let body_ids = body_node_ids(&graph, loop_id);
        let index_selector = Selector::new(loop_id, "index");

        {
            let mut pool = ctx.state.variable_pool.write();
            for var in &config.loop_variables {
                let value = initial_value(&pool, var)?;
                pool.add(&Selector::new(loop_id, var.label.clone()), value);
            }
        }

        let inputs = HashMap::from([("loop_count".to_string(), json!(loop_count))]);
        ctx.emitter
            .emit(GraphEngineEvent::LoopRunStarted {
                id: ctx.exec_id.clone(),
                loop_id: loop_id.to_string(),
                inputs: inputs.clone(),
                scope: ctx.scope.clone(),
            })
            .await;

        let usage_before = ctx.state.llm_usage();
        let mut duration_map: HashMap<String, Value> = HashMap::new();
        let mut completed_reason = LOOP_COMPLETED;
        let mut rounds = 0usize;

        let already_done = {
            let pool = ctx.state.variable_pool.read();
            self.should_break(loop_id, &pool, &config)?
        };
        if already_done {
            completed_reason = LOOP_BREAK;
        }

        while !already_done && rounds < loop_count {
            let index = rounds;
            ctx.state
                .variable_pool
                .write()
                .add(&index_selector, index as i64);
            ctx.emitter
                .emit(GraphEngineEvent::LoopRunNext {
                    id: ctx.exec_id.clone(),
                    loop_id: loop_id.to_string(),
                    index,
                    scope: ctx.scope.clone(),
                })
                .await;

            debug!(loop_id = %loop_id, loop_index = index, "loop round started");
            let started = ctx.runtime.time_provider.now_millis();
            let mut engine =
                ctx.child_engine(graph.clone(), ctx.state.clone(), ctx.scope.in_loop(loop_id, index));
            let run = engine.run().await;
            let finished = ctx.runtime.time_provider.now_millis();
            duration_map.insert(index.to_string(), json!(elapsed_secs(started, finished)));
            rounds += 1;

            // 先判断是否跳出，再清理循环体内的变量
            let outcome = match run {
                Ok(_) => {
                    let mut pool = ctx.state.variable_pool.write();
                    let decision = self.should_break(loop_id, &pool, &config);
                    clear_body_variables(&mut pool, &body_ids);
                    decision.map_err(|e| e.to_string())
                }
                Err(e) => {
                    clear_body_variables(&mut ctx.state.variable_pool.write(), &body_ids);
                    Err(e.to_string())
                }
            };

            match outcome {
                Ok(true) => {
                    completed_reason = LOOP_BREAK;
                    break;
                }
                Ok(false) => {}
                Err(error) => {
                    ctx.state.variable_pool.write().remove(&index_selector);
                    let mut metadata = usage_metadata(&usage_before, &ctx.state.llm_usage());
                    metadata.insert(
                        metadata_keys::LOOP_DURATION_MAP.to_string(),
                        json!(duration_map),
                    );
                    warn!(loop_id = %loop_id, loop_index = index, error = %error, "loop round failed");
                    ctx.emitter
                        .emit(GraphEngineEvent::LoopRunFailed {
                            id: ctx.exec_id.clone(),
                            loop_id: loop_id.to_string(),
                            error: error.clone(),
                            steps: rounds,
                            metadata,
                            scope: ctx.scope.clone(),
                        })
                        .await;
                    return Err(NodeError::SubGraphError(format!(
                        "Loop {} failed at index {}: {}",
                        loop_id, index, error
                    )));
                }
            }
        }

        let outputs: HashMap<String, Segment> = {
            let mut pool = ctx.state.variable_pool.write();
            pool.remove(&index_selector);
            config
                .loop_variables
                .iter()
                .map(|var| {
                    let value = pool
                        .get(&Selector::new(loop_id, var.label.clone()))
                        .cloned()
                        .unwrap_or_default();
                    (var.label.clone(), value)
                })
                .collect()
        };

        let mut metadata = usage_metadata(&usage_before, &ctx.state.llm_usage());
        metadata.insert(metadata_keys::COMPLETED_REASON.to_string(), json!(completed_reason));
        metadata.insert(metadata_keys::STEPS.to_string(), json!(rounds));
        metadata.insert(metadata_keys::LOOP_DURATION_MAP.to_string(), json!(duration_map));

        info!(loop_id = %loop_id, rounds, completed_reason, "loop finished");
        let result = NodeRunResult {
            inputs,
            outputs,
            metadata,
            ..Default::default()
        };
        ctx.emitter
            .emit(GraphEngineEvent::LoopRunSucceeded {
                id: ctx.exec_id.clone(),
                loop_id: loop_id.to_string(),
                outputs: result.outputs_as_values(),
                steps: rounds,
                metadata: result.metadata.clone(),
                scope: ctx.scope.clone(),
            })
            .await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::EngineConfig;
    use crate::core::runtime_context::{FakeTimeProvider, RuntimeContext};
    use crate::dsl::schema::{GraphConfig, NodeType};
    use crate::nodes::control_flow::test_support::node_context;
    use crate::nodes::executor::NodeExecutorRegistry;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Adds one to `(loop1, count)` and publishes the new value as `seen`.
    struct Increment;

    #[async_trait]
    impl NodeExecutor for Increment {
        async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
            let mut pool = ctx.state.variable_pool.write();
            let sel = Selector::new("loop1", "count");
            let next = match pool.get(&sel) {
                Some(Segment::Integer(n)) => n + 1,
                _ => 1,
            };
            pool.add(&sel, next);
            Ok(NodeRunResult::succeeded(HashMap::from([(
                "seen".to_string(),
                Segment::Integer(next),
            )])))
        }
    }

    struct Boom;

    #[async_trait]
    impl NodeExecutor for Boom {
        async fn execute(&self, _ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
            Err(NodeError::ExecutionError("boom".into()))
        }
    }

    fn body_config(body_type: &str) -> GraphConfig {
        serde_json::from_value(json!({
            "nodes": [
                {"id": "loop1", "data": {"type": "loop"}},
                {"id": "loop_start", "data": {"type": "loop-start", "loop_id": "loop1"}},
                {"id": "body", "data": {"type": body_type, "loop_id": "loop1"}}
            ],
            "edges": [{"source": "loop_start", "target": "body"}]
        }))
        .unwrap()
    }

    fn loop_context(
        config: Value,
        body_type: &str,
    ) -> (NodeContext, mpsc::Receiver<GraphEngineEvent>) {
        let (mut ctx, rx) = node_context("loop1", NodeType::Loop, config, VariablePool::new());
        let mut registry = NodeExecutorRegistry::with_builtins();
        registry.register(NodeType::Code, "1", Arc::new(Increment));
        registry.register(NodeType::Tool, "1", Arc::new(Boom));
        ctx.graph_config = Arc::new(body_config(body_type));
        ctx.runtime = RuntimeContext::default()
            .with_registry(Arc::new(registry))
            .with_config(EngineConfig::default())
            .with_time_provider(Arc::new(FakeTimeProvider::new(0)));
        (ctx, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<GraphEngineEvent>) -> Vec<GraphEngineEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn next_indices(events: &[GraphEngineEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                GraphEngineEvent::LoopRunNext { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_loop_runs_loop_count_times() {
        let (ctx, mut rx) = loop_context(
            json!({
                "loop_count": 3,
                "start_node_id": "loop_start",
                "loop_variables": [{"label": "count", "value_type": "constant", "value": 0}]
            }),
            "code",
        );

        let result = LoopNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.outputs["count"], Segment::Integer(3));
        assert_eq!(result.metadata[metadata_keys::COMPLETED_REASON], json!(LOOP_COMPLETED));

        let events = drain(&mut rx);
        assert_eq!(next_indices(&events), vec![0, 1, 2]);
        let body_events: Vec<_> = events
            .iter()
            .filter(|e| e.node_id() == Some("body"))
            .filter_map(|e| e.scope())
            .collect();
        assert!(body_events.iter().all(|s| s.in_loop_id.as_deref() == Some("loop1")));

        let pool = ctx.state.variable_pool.read();
        assert!(!pool.has(&Selector::new("body", "seen")));
        assert!(!pool.has(&Selector::new("loop1", "index")));
    }

    #[tokio::test]
    async fn test_loop_break_after_round() {
        let (ctx, mut rx) = loop_context(
            json!({
                "loop_count": 5,
                "start_node_id": "loop_start",
                "loop_variables": [{"label": "count", "value": 0}],
                "break_conditions": [
                    {"variable_selector": ["loop1", "count"], "comparison_operator": "≥", "value": "2"}
                ]
            }),
            "code",
        );

        let result = LoopNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.outputs["count"], Segment::Integer(2));
        assert_eq!(result.metadata[metadata_keys::COMPLETED_REASON], json!(LOOP_BREAK));
        assert_eq!(next_indices(&drain(&mut rx)), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_break_on_body_output_tolerates_missing_variable() {
        let (ctx, mut rx) = loop_context(
            json!({
                "loop_count": 4,
                "start_node_id": "loop_start",
                "break_conditions": [
                    {"variable_selector": ["body", "seen"], "comparison_operator": "=", "value": "1"}
                ]
            }),
            "code",
        );

        let result = LoopNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.metadata[metadata_keys::COMPLETED_REASON], json!(LOOP_BREAK));
        assert_eq!(next_indices(&drain(&mut rx)), vec![0]);
    }

    #[tokio::test]
    async fn test_break_before_first_round() {
        let (ctx, mut rx) = loop_context(
            json!({
                "loop_count": 4,
                "start_node_id": "loop_start",
                "loop_variables": [{"label": "count", "value": 9}],
                "break_conditions": [
                    {"variable_selector": ["loop1", "count"], "comparison_operator": ">", "value": "1"}
                ]
            }),
            "code",
        );

        let result = LoopNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.metadata[metadata_keys::STEPS], json!(0));
        assert_eq!(result.metadata[metadata_keys::COMPLETED_REASON], json!(LOOP_BREAK));
        assert!(next_indices(&drain(&mut rx)).is_empty());
    }

    #[tokio::test]
    async fn test_loop_count_is_clamped() {
        let (mut ctx, mut rx) = loop_context(
            json!({"loop_count": 50, "start_node_id": "loop_start"}),
            "code",
        );
        ctx.runtime.config.max_loop_count = 2;
        LoopNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(next_indices(&drain(&mut rx)), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_body_failure_stops_loop() {
        let (ctx, mut rx) = loop_context(
            json!({"loop_count": 3, "start_node_id": "loop_start"}),
            "tool",
        );

        let err = LoopNodeExecutor::new().execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::SubGraphError(_)));
        let events = drain(&mut rx);
        assert_eq!(next_indices(&events), vec![0]);
        assert!(matches!(
            events.last(),
            Some(GraphEngineEvent::LoopRunFailed { steps: 1, .. })
        ));
        assert!(!ctx
            .state
            .variable_pool
            .read()
            .has(&Selector::new("loop1", "index")));
    }

    #[tokio::test]
    async fn test_variable_loop_value() {
        let (ctx, _rx) = loop_context(
            json!({
                "loop_count": 1,
                "start_node_id": "loop_start",
                "loop_variables": [
                    {"label": "count", "value_type": "variable", "value": ["start", "n"]}
                ]
            }),
            "code",
        );
        ctx.state
            .variable_pool
            .write()
            .add(&Selector::new("start", "n"), 10i64);

        let result = LoopNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.outputs["count"], Segment::Integer(11));
    }
}
