//! Iteration Node executor.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{body_node_ids, clear_body_variables, elapsed_secs, usage_metadata};
use crate::core::event_bus::GraphEngineEvent;
use crate::core::runtime_state::GraphRuntimeState;
use crate::core::variable_pool::{Segment, Selector, VariablePool, CONVERSATION_VARIABLE_NODE_ID};
use crate::domain::model::{IterationErrorMode, IterationNodeConfig};
use crate::dsl::schema::{metadata_keys, NodeRunResult};
use crate::error::{NodeError, WorkflowError};
use crate::graph::Graph;
use crate::nodes::executor::{NodeContext, NodeExecutor};

/// Executor for the Iteration node. Runs its body once per element of the
/// iterator array and collects `output_selector` from every run.
pub struct IterationNodeExecutor;

impl IterationNodeExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IterationNodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one item run.
struct ItemOutcome {
    index: usize,
    output: Result<Segment, WorkflowError>,
    /// The failure broke a run-wide limit, so no error mode may absorb it.
    fatal: bool,
    /// Conversation variables the item changed, parallel mode only.
    conversation: HashMap<String, Segment>,
    duration_secs: f64,
}

/// Everything an item run needs, cloned once per item.
#[derive(Clone)]
struct ItemRunner {
    ctx: NodeContext,
    graph: Graph,
    body_ids: Vec<String>,
    output_selector: Selector,
}

impl ItemRunner {
    fn iteration_id(&self) -> &str {
        &self.ctx.node_id
    }

    fn seed(&self, pool: &mut VariablePool, index: usize, item: Segment) {
        pool.add(&Selector::new(self.iteration_id(), "item"), item);
        pool.add(&Selector::new(self.iteration_id(), "index"), index as i64);
    }

    /// Run the body once against the pool held by `state`.
    async fn run(
        &self,
        index: usize,
        parallel_mode_run_id: Option<String>,
        state: GraphRuntimeState,
    ) -> ItemOutcome {
        let ctx = &self.ctx;
        ctx.emitter
            .emit(GraphEngineEvent::IterationRunNext {
                id: ctx.exec_id.clone(),
                iteration_id: ctx.node_id.clone(),
                index,
                scope: ctx.scope.clone(),
            })
            .await;
        debug!(iteration_id = %ctx.node_id, iteration_index = index, "iteration item started");

        let started = ctx.runtime.time_provider.now_millis();
        let scope = ctx.scope.in_iteration(&ctx.node_id, index, parallel_mode_run_id);
        let mut engine = ctx.child_engine(self.graph.clone(), state.clone(), scope);
        let run = engine.run().await;
        let finished = ctx.runtime.time_provider.now_millis();

        let output = {
            let mut pool = state.variable_pool.write();
            let output = run.map(|_| pool.resolve(&self.output_selector).unwrap_or_default());
            clear_body_variables(&mut pool, &self.body_ids);
            output
        };
        // 嵌套的循环或迭代会把预算错误包装成普通节点错误，所以还要直接检查预算
        let fatal = match &output {
            Ok(_) => false,
            Err(e) => {
                e.is_run_limit()
                    || ctx
                        .runtime
                        .exceeded_limit(state.steps(), state.start_at_millis())
                        .is_some()
            }
        };

        ItemOutcome {
            index,
            output,
            fatal,
            conversation: HashMap::new(),
            duration_secs: elapsed_secs(started, finished),
        }
    }
}

#[async_trait]
impl NodeExecutor for IterationNodeExecutor {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let config: IterationNodeConfig = ctx.parse_config()?;
        let iteration_id = ctx.node_id.clone();

        let iterator = ctx
            .state
            .variable_pool
            .read()
            .resolve(&config.iterator_selector);
        let items = match iterator {
            None => {
                return Err(NodeError::ConfigError(format!(
                    "Iterator variable {} not found",
                    config.iterator_selector
                )))
            }
            Some(Segment::None) => Vec::new(),
            Some(segment) => segment.array_items().ok_or_else(|| {
                NodeError::ConfigError(format!(
                    "Iterator variable {} is not an array",
                    config.iterator_selector
                ))
            })?,
        };

        // 空数组直接成功，不创建子引擎
        if items.is_empty() {
            return Ok(NodeRunResult::succeeded(HashMap::from([(
                "output".to_string(),
                Segment::Array(Vec::new()),
            )])));
        }

        let graph = ctx.body_graph(&config.start_node_id)?;
        let runner = ItemRunner {
            ctx: ctx.clone(),
            body_ids: body_node_ids(&graph, &iteration_id),
            graph,
            output_selector: config.output_selector.clone(),
        };

        let inputs = HashMap::from([(
            "iterator_selector".to_string(),
            Value::Array(items.iter().map(Segment::to_value).collect()),
        )]);
        ctx.emitter
            .emit(GraphEngineEvent::IterationRunStarted {
                id: ctx.exec_id.clone(),
                iteration_id: iteration_id.clone(),
                inputs: inputs.clone(),
                scope: ctx.scope.clone(),
            })
            .await;

        let usage_before = ctx.state.llm_usage();
        let parallel = config.is_parallel && ctx.runtime.config.parallel_enabled;
        let run = if parallel {
            let workers = config
                .parallel_nums
                .unwrap_or(ctx.runtime.config.default_parallel_nums)
                .max(1);
            run_parallel(&runner, items, workers, config.error_handle_mode).await
        } else {
            run_sequential(&runner, items, config.error_handle_mode).await
        };

        {
            let mut pool = ctx.state.variable_pool.write();
            pool.remove(&Selector::new(&iteration_id, "item"));
            pool.remove(&Selector::new(&iteration_id, "index"));
        }

        let mut metadata = usage_metadata(&usage_before, &ctx.state.llm_usage());
        metadata.insert(
            metadata_keys::ITERATION_DURATION_MAP.to_string(),
            json!(run.duration_map),
        );

        if let Some(error) = run.error {
            warn!(iteration_id = %iteration_id, error = %error, "iteration failed");
            ctx.emitter
                .emit(GraphEngineEvent::IterationRunFailed {
                    id: ctx.exec_id.clone(),
                    iteration_id: iteration_id.clone(),
                    error: error.clone(),
                    steps: run.duration_map.len(),
                    metadata,
                    scope: ctx.scope.clone(),
                })
                .await;
            return Err(NodeError::SubGraphError(error));
        }

        let values: Vec<Value> = run.outputs.iter().map(Segment::to_value).collect();
        let output = Value::Array(flatten_outputs(values, config.flatten_output));
        info!(
            iteration_id = %iteration_id,
            items = run.duration_map.len(),
            parallel,
            "iteration finished"
        );

        let result = NodeRunResult {
            inputs,
            outputs: HashMap::from([("output".to_string(), Segment::from_value(&output))]),
            metadata,
            ..Default::default()
        };
        ctx.emitter
            .emit(GraphEngineEvent::IterationRunSucceeded {
                id: ctx.exec_id.clone(),
                iteration_id,
                outputs: HashMap::from([("output".to_string(), output)]),
                steps: run.duration_map.len(),
                metadata: result.metadata.clone(),
                scope: ctx.scope.clone(),
            })
            .await;
        Ok(result)
    }
}

impl ItemOutcome {
    /// Whether this outcome stops the remaining items from running.
    fn halts(&self, mode: IterationErrorMode) -> bool {
        self.output.is_err() && (self.fatal || mode == IterationErrorMode::Terminated)
    }
}

/// Collected results of all item runs.
#[derive(Default)]
struct IterationRun {
    outputs: Vec<Segment>,
    duration_map: HashMap<String, f64>,
    error: Option<String>,
}

impl IterationRun {
    /// Slots are in item order; `None` marks an omitted output.
    fn collect(
        &mut self,
        slots: Vec<Option<ItemOutcome>>,
        mode: IterationErrorMode,
        iteration_id: &str,
    ) {
        for outcome in slots.into_iter().flatten() {
            self.duration_map
                .insert(outcome.index.to_string(), outcome.duration_secs);
            let halts = outcome.halts(mode);
            match outcome.output {
                Ok(value) => self.outputs.push(value),
                Err(error) if halts => {
                    if self.error.is_none() {
                        self.error = Some(format!(
                            "Iteration {} failed at index {}: {}",
                            iteration_id, outcome.index, error
                        ));
                    }
                }
                Err(error) if mode == IterationErrorMode::ContinueOnError => {
                    warn!(iteration_id = %iteration_id, iteration_index = outcome.index, error = %error, "item failed, output set to none");
                    self.outputs.push(Segment::None);
                }
                Err(error) => {
                    warn!(iteration_id = %iteration_id, iteration_index = outcome.index, error = %error, "item failed, output removed");
                }
            }
        }
    }
}

/// 顺序模式：共享同一个变量池，逐个执行
async fn run_sequential(
    runner: &ItemRunner,
    items: Vec<Segment>,
    mode: IterationErrorMode,
) -> IterationRun {
    let state = runner.ctx.state.clone();
    let mut slots = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        runner.seed(&mut state.variable_pool.write(), index, item);
        let outcome = runner.run(index, None, state.clone()).await;
        let halts = outcome.halts(mode);
        slots.push(Some(outcome));
        if halts {
            break;
        }
    }
    let mut run = IterationRun::default();
    run.collect(slots, mode, runner.iteration_id());
    run
}

/// 并行模式：每个元素使用独立的变量池副本，会话变量按下标顺序合并回来
async fn run_parallel(
    runner: &ItemRunner,
    items: Vec<Segment>,
    workers: usize,
    mode: IterationErrorMode,
) -> IterationRun {
    let base_pool = Arc::new(runner.ctx.state.variable_pool.read().clone());
    let base_conversation = Arc::new(base_pool.snapshot_owner(CONVERSATION_VARIABLE_NODE_ID));
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut join_set: JoinSet<ItemOutcome> = JoinSet::new();
    let total = items.len();

    for (index, item) in items.into_iter().enumerate() {
        let run_id = runner.ctx.runtime.id_generator.next_id();
        let runner = runner.clone();
        let semaphore = semaphore.clone();
        let base_pool = base_pool.clone();
        let base_conversation = base_conversation.clone();

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return ItemOutcome {
                        index,
                        output: Err(WorkflowError::InternalError(e.to_string())),
                        fatal: true,
                        conversation: HashMap::new(),
                        duration_secs: 0.0,
                    }
                }
            };
            // 拿到许可后才复制变量池，排队中的元素不占用内存
            let mut pool = VariablePool::clone(&base_pool);
            runner.seed(&mut pool, index, item);
            let state = runner.ctx.state.with_isolated_pool(pool);
            let mut outcome = runner.run(index, Some(run_id), state.clone()).await;
            outcome.conversation = state
                .variable_pool
                .read()
                .snapshot_owner(CONVERSATION_VARIABLE_NODE_ID)
                .into_iter()
                .filter(|(name, value)| base_conversation.get(name) != Some(value))
                .collect();
            outcome
        });
    }

    let mut slots: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();
    let mut join_error = None;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => {
                let halts = outcome.halts(mode);
                let index = outcome.index;
                slots[index] = Some(outcome);
                if halts {
                    join_set.shutdown().await;
                    break;
                }
            }
            Err(e) => {
                join_error = Some(format!("iteration worker join error: {}", e));
                join_set.shutdown().await;
                break;
            }
        }
    }

    {
        let mut pool = runner.ctx.state.variable_pool.write();
        for outcome in slots.iter_mut().flatten() {
            let changed = std::mem::take(&mut outcome.conversation);
            pool.restore_owner(CONVERSATION_VARIABLE_NODE_ID, changed);
        }
    }

    let mut run = IterationRun::default();
    run.collect(slots, mode, runner.iteration_id());
    if run.error.is_none() {
        run.error = join_error;
    }
    run
}

/// Concatenate the outputs when every one of them is a list.
fn flatten_outputs(values: Vec<Value>, flatten: bool) -> Vec<Value> {
    if !flatten || values.is_empty() || !values.iter().all(Value::is_array) {
        return values;
    }
    values
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}
