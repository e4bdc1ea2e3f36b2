//! Graph engine: the execution driver of one [`Graph`].
//!
//! The [`GraphEngine`] starts at the graph's root node, executes each ready
//! node through its registered [`NodeExecutor`], resolves outgoing edges
//! against the node's `edge_source_handle`, and keeps going until nothing is
//! left to run. Loop and iteration nodes build their own child engines over a
//! slice of the same graph config; those share the run's step counter, usage
//! accumulator, clock and stop signal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::event_bus::{EventEmitter, EventScope, GraphEngineEvent};
use crate::core::runtime_context::RuntimeContext;
use crate::core::runtime_state::GraphRuntimeState;
use crate::core::variable_pool::Segment;
use crate::dsl::schema::{
    metadata_keys, ErrorStrategyConfig, ErrorStrategyType, GraphConfig, NodeRunResult, NodeType,
    RetryConfig, WorkflowNodeExecutionStatus, FAIL_BRANCH_HANDLE, SOURCE_HANDLE,
};
use crate::error::{NodeError, WorkflowError, WorkflowResult};
use crate::graph::{EdgeState, Graph};
use crate::nodes::executor::{NodeContext, NodeExecutor};

/// Configuration for the workflow engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_execution_steps: usize,
    pub max_execution_time_secs: u64,
    pub parallel_enabled: bool,
    /// Upper bound on nodes running at once; 0 means unlimited.
    pub max_concurrency: usize,
    /// Capacity of the bounded event channel.
    pub event_buffer: usize,
    /// Workers of a parallel iteration that does not set `parallel_nums`.
    pub default_parallel_nums: usize,
    /// Upper clamp for a loop node's `loop_count`.
    pub max_loop_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_execution_steps: 500,
            max_execution_time_secs: 1200,
            parallel_enabled: true,
            max_concurrency: 0,
            event_buffer: 256,
            default_parallel_nums: crate::domain::model::DEFAULT_PARALLEL_NUMS,
            max_loop_count: 100,
        }
    }
}

/// What a finished graph run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphRunOutcome {
    pub outputs: HashMap<String, Value>,
    /// Nodes that failed but recovered through their error strategy.
    pub exceptions_count: usize,
}

#[derive(Clone)]
struct NodeInfo {
    node_type: NodeType,
    title: String,
    config: Value,
    error_strategy: Option<ErrorStrategyConfig>,
    retry_config: Option<RetryConfig>,
    executor: Arc<dyn NodeExecutor>,
}

struct NodeExecOutcome {
    exec_id: String,
    node_id: String,
    info: NodeInfo,
    scope: EventScope,
    result: Result<NodeRunResult, NodeError>,
}

/// Drives one graph: the whole workflow, or the body of a loop/iteration.
pub struct GraphEngine {
    graph: Arc<Graph>,
    graph_config: Arc<GraphConfig>,
    state: GraphRuntimeState,
    runtime: RuntimeContext,
    emitter: EventEmitter,
    scope: EventScope,
    is_sub_graph: bool,
    edge_states: Vec<EdgeState>,
    exceptions_count: usize,
    outputs: HashMap<String, Value>,
}

impl GraphEngine {
    /// Engine for a top-level run. Emits the `GraphRun*` events.
    pub fn new(
        graph: Graph,
        graph_config: Arc<GraphConfig>,
        state: GraphRuntimeState,
        runtime: RuntimeContext,
        emitter: EventEmitter,
    ) -> Self {
        let edge_states = vec![EdgeState::Unknown; graph.edge_count()];
        GraphEngine {
            graph: Arc::new(graph),
            graph_config,
            state,
            runtime,
            emitter,
            scope: EventScope::default(),
            is_sub_graph: false,
            edge_states,
            exceptions_count: 0,
            outputs: HashMap::new(),
        }
    }

    /// Engine for a loop or iteration body. Node events are tagged with
    /// `scope`; the graph-level start/finish events are left to the container.
    pub fn sub_graph(
        graph: Graph,
        graph_config: Arc<GraphConfig>,
        state: GraphRuntimeState,
        runtime: RuntimeContext,
        emitter: EventEmitter,
        scope: EventScope,
    ) -> Self {
        let mut engine = Self::new(graph, graph_config, state, runtime, emitter);
        engine.scope = scope;
        engine.is_sub_graph = true;
        engine
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn state(&self) -> &GraphRuntimeState {
        &self.state
    }

    /// Run the graph to completion.
    ///
    /// A top-level engine emits exactly one terminal event: `GraphRunSucceeded`,
    /// `GraphRunPartialSucceeded` or `GraphRunFailed`.
    pub async fn run(&mut self) -> WorkflowResult<GraphRunOutcome> {
        if !self.is_sub_graph {
            info!(root = %self.graph.root_node_id(), "graph run started");
            self.emitter.emit(GraphEngineEvent::GraphRunStarted).await;
        }

        match self.drive().await {
            Ok(()) => {
                let outcome = GraphRunOutcome {
                    outputs: self.outputs.clone(),
                    exceptions_count: self.exceptions_count,
                };
                if !self.is_sub_graph {
                    info!(
                        steps = self.state.steps(),
                        exceptions_count = self.exceptions_count,
                        "graph run finished"
                    );
                    let event = if self.exceptions_count > 0 {
                        GraphEngineEvent::GraphRunPartialSucceeded {
                            outputs: outcome.outputs.clone(),
                            exceptions_count: self.exceptions_count,
                        }
                    } else {
                        GraphEngineEvent::GraphRunSucceeded {
                            outputs: outcome.outputs.clone(),
                        }
                    };
                    self.emitter.emit(event).await;
                }
                Ok(outcome)
            }
            Err(e) => {
                if !self.is_sub_graph {
                    error!(error = %e, steps = self.state.steps(), "graph run failed");
                    self.emitter
                        .emit(GraphEngineEvent::GraphRunFailed {
                            error: e.to_string(),
                            exceptions_count: self.exceptions_count,
                            llm_usage: self.state.llm_usage(),
                        })
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> WorkflowResult<()> {
        let infos = self.load_node_infos()?;
        let max_concurrency = if self.runtime.config.parallel_enabled {
            self.runtime.config.max_concurrency
        } else {
            1
        };

        let mut ready: VecDeque<(String, Option<String>)> =
            VecDeque::from([(self.graph.root_node_id().to_string(), None)]);
        let mut running: HashSet<String> = HashSet::new();
        let mut active_branches: Vec<(String, String)> = Vec::new();
        let mut join_set: JoinSet<NodeExecOutcome> = JoinSet::new();

        loop {
            while max_concurrency == 0 || join_set.len() < max_concurrency {
                let Some((node_id, predecessor)) = ready.pop_front() else {
                    break;
                };

                if let Err(e) = self.check_limits() {
                    join_set.shutdown().await;
                    return Err(e);
                }

                let info = infos
                    .get(&node_id)
                    .cloned()
                    .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;
                let scope = self.node_scope(&node_id);
                self.start_branch_if_needed(&node_id, &mut active_branches)
                    .await;

                let exec_id = self.runtime.id_generator.next_id();
                debug!(node_id = %node_id, node_type = %info.node_type, "node started");
                self.emitter
                    .emit(GraphEngineEvent::NodeRunStarted {
                        id: exec_id.clone(),
                        node_id: node_id.clone(),
                        node_type: info.node_type,
                        node_title: info.title.clone(),
                        predecessor_node_id: predecessor,
                        scope: scope.clone(),
                    })
                    .await;

                let ctx = NodeContext {
                    node_id: node_id.clone(),
                    exec_id,
                    node_type: info.node_type,
                    title: info.title.clone(),
                    config: info.config.clone(),
                    graph_config: self.graph_config.clone(),
                    state: self.state.clone(),
                    runtime: self.runtime.clone(),
                    emitter: self.emitter.clone(),
                    scope,
                };
                running.insert(node_id);
                join_set.spawn(execute_node_with_retry(ctx, info));
            }

            if join_set.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = self.runtime.stop_signal.cancelled() => None,
                joined = join_set.join_next() => Some(joined),
            };
            let Some(joined) = joined else {
                join_set.shutdown().await;
                warn!("graph run stopped by request");
                return Err(WorkflowError::Aborted("stop requested".to_string()));
            };
            let Some(joined) = joined else {
                continue;
            };
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    join_set.shutdown().await;
                    return Err(WorkflowError::InternalError(format!(
                        "node task join error: {}",
                        join_error
                    )));
                }
            };
            running.remove(&outcome.node_id);

            match outcome.result {
                Ok(result) => {
                    let downstream = self
                        .handle_node_success(
                            &outcome.exec_id,
                            &outcome.node_id,
                            &outcome.info,
                            &outcome.scope,
                            result,
                        )
                        .await;
                    for next in downstream {
                        ready.push_back((next, Some(outcome.node_id.clone())));
                    }
                    self.finish_branches(&mut active_branches, &ready, &running)
                        .await;
                }
                Err(e) => {
                    join_set.shutdown().await;
                    return Err(self
                        .handle_node_failure(
                            &outcome.exec_id,
                            &outcome.node_id,
                            &outcome.info,
                            &outcome.scope,
                            e,
                        )
                        .await);
                }
            }
        }

        Ok(())
    }

    /// Resolve every node's executor before anything runs.
    fn load_node_infos(&self) -> WorkflowResult<HashMap<String, NodeInfo>> {
        let mut infos = HashMap::with_capacity(self.graph.node_ids().len());
        for node_id in self.graph.node_ids() {
            let node = self
                .graph
                .node_config(node_id)
                .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;
            let executor = self
                .runtime
                .registry
                .get(node.data.node_type, &node.data.version)
                .ok_or_else(|| WorkflowError::ExecutorNotFound(node.data.node_type.to_string()))?;
            infos.insert(
                node_id.clone(),
                NodeInfo {
                    node_type: node.data.node_type,
                    title: node.data.title.clone(),
                    config: node.data.config_value(),
                    error_strategy: node.data.error_strategy.clone(),
                    retry_config: node.data.retry_config.clone(),
                    executor,
                },
            );
        }
        Ok(infos)
    }

    /// Checked before every node step: stop request, step budget, time budget.
    fn check_limits(&self) -> WorkflowResult<()> {
        if self.runtime.stop_signal.is_triggered() {
            return Err(WorkflowError::Aborted("stop requested".to_string()));
        }
        let steps = self.state.increment_steps();
        match self.runtime.exceeded_limit(steps, self.state.start_at_millis()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn node_scope(&self, node_id: &str) -> EventScope {
        match self.graph.parallel_of(node_id) {
            Some((parallel, branch_start)) => self.scope.in_parallel(&parallel.id, branch_start),
            None => self.scope.clone(),
        }
    }

    async fn start_branch_if_needed(
        &self,
        node_id: &str,
        active_branches: &mut Vec<(String, String)>,
    ) {
        let Some((parallel, branch_start)) = self.graph.parallel_of(node_id) else {
            return;
        };
        if branch_start != node_id {
            return;
        }
        let key = (parallel.id.clone(), branch_start.to_string());
        if active_branches.contains(&key) {
            return;
        }
        self.emitter
            .emit(GraphEngineEvent::ParallelBranchRunStarted {
                parallel_id: key.0.clone(),
                parallel_start_node_id: key.1.clone(),
                scope: self.scope.clone(),
            })
            .await;
        active_branches.push(key);
    }

    /// A branch is done once none of its nodes is queued or running.
    async fn finish_branches(
        &self,
        active_branches: &mut Vec<(String, String)>,
        ready: &VecDeque<(String, Option<String>)>,
        running: &HashSet<String>,
    ) {
        let mut finished = Vec::new();
        for (parallel_id, start_node_id) in active_branches.iter() {
            let Some(branch) = self
                .graph
                .parallel(parallel_id)
                .and_then(|p| p.branches.iter().find(|b| &b.start_node_id == start_node_id))
            else {
                continue;
            };
            let busy = running.iter().any(|id| branch.node_ids.contains(id))
                || ready.iter().any(|(id, _)| branch.node_ids.contains(id));
            if !busy {
                finished.push((parallel_id.clone(), start_node_id.clone()));
            }
        }

        for key in finished {
            active_branches.retain(|k| k != &key);
            self.emitter
                .emit(GraphEngineEvent::ParallelBranchRunSucceeded {
                    parallel_id: key.0,
                    parallel_start_node_id: key.1,
                    scope: self.scope.clone(),
                })
                .await;
        }
    }

    async fn handle_node_success(
        &mut self,
        exec_id: &str,
        node_id: &str,
        info: &NodeInfo,
        scope: &EventScope,
        result: NodeRunResult,
    ) -> Vec<String> {
        if let Some(usage) = &result.llm_usage {
            self.state.add_usage(usage);
        }

        // 写入变量池
        self.state
            .variable_pool
            .write()
            .set_node_outputs(node_id, &result.outputs);

        match info.node_type {
            NodeType::End => {
                for (key, value) in &result.outputs {
                    self.outputs.insert(key.clone(), value.to_value());
                }
            }
            NodeType::Answer => {
                for (key, value) in &result.outputs {
                    if key == "answer" {
                        let existing = self
                            .outputs
                            .get("answer")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let combined = format!("{}{}", existing, value.to_display_string());
                        self.outputs.insert(key.clone(), Value::String(combined));
                    } else {
                        self.outputs.insert(key.clone(), value.to_value());
                    }
                }
            }
            _ => {}
        }

        self.emitter
            .emit(GraphEngineEvent::NodeRunStreamCompleted {
                id: exec_id.to_string(),
                node_id: node_id.to_string(),
                node_type: info.node_type,
                result: result.clone(),
                scope: scope.clone(),
            })
            .await;

        if result.status == WorkflowNodeExecutionStatus::Exception {
            self.exceptions_count += 1;
            let error = result.error.clone().unwrap_or_default();
            warn!(node_id = %node_id, error = %error, "node failed, recovered by error strategy");
            self.emitter
                .emit(GraphEngineEvent::NodeRunException {
                    id: exec_id.to_string(),
                    node_id: node_id.to_string(),
                    node_type: info.node_type,
                    error,
                    result: result.clone(),
                    scope: scope.clone(),
                })
                .await;
        } else {
            debug!(node_id = %node_id, handle = %result.edge_source_handle, "node succeeded");
            self.emitter
                .emit(GraphEngineEvent::NodeRunSucceeded {
                    id: exec_id.to_string(),
                    node_id: node_id.to_string(),
                    node_type: info.node_type,
                    result: result.clone(),
                    scope: scope.clone(),
                })
                .await;
        }

        self.advance_edges(node_id, &result.edge_source_handle)
    }

    async fn handle_node_failure(
        &self,
        exec_id: &str,
        node_id: &str,
        info: &NodeInfo,
        scope: &EventScope,
        error: NodeError,
    ) -> WorkflowError {
        error!(node_id = %node_id, node_type = %info.node_type, error = %error, "node failed");
        self.emitter
            .emit(GraphEngineEvent::NodeRunFailed {
                id: exec_id.to_string(),
                node_id: node_id.to_string(),
                node_type: info.node_type,
                error: error.to_string(),
                scope: scope.clone(),
            })
            .await;

        if let Some((parallel, branch_start)) = self.graph.parallel_of(node_id) {
            self.emitter
                .emit(GraphEngineEvent::ParallelBranchRunFailed {
                    parallel_id: parallel.id.clone(),
                    parallel_start_node_id: branch_start.to_string(),
                    error: error.to_string(),
                    scope: self.scope.clone(),
                })
                .await;
        }

        WorkflowError::NodeExecutionError {
            node_id: node_id.to_string(),
            error: error.to_string(),
        }
    }

    /// Mark the node's outgoing edges taken or skipped by `handle` and return
    /// the nodes that became ready.
    fn advance_edges(&mut self, node_id: &str, handle: &str) -> Vec<String> {
        let graph = Arc::clone(&self.graph);
        let mut targets: Vec<&str> = Vec::new();
        for edge in graph.outgoing_edges(node_id) {
            self.edge_states[edge.index] = if edge.is_taken_by(handle) {
                EdgeState::Taken
            } else {
                EdgeState::Skipped
            };
            if !targets.contains(&edge.target_node_id.as_str()) {
                targets.push(edge.target_node_id.as_str());
            }
        }

        let mut ready = Vec::new();
        for target in targets {
            self.resolve_target(&graph, target, &mut ready);
        }
        ready
    }

    /// 所有入边都已确定后：有任一边被选中则就绪，否则跳过该节点并继续向下传播
    fn resolve_target(&mut self, graph: &Graph, node_id: &str, ready: &mut Vec<String>) {
        let mut any_taken = false;
        for edge in graph.incoming_edges(node_id) {
            match self.edge_states[edge.index] {
                EdgeState::Unknown => return,
                EdgeState::Taken => any_taken = true,
                EdgeState::Skipped => {}
            }
        }
        if any_taken {
            ready.push(node_id.to_string());
            return;
        }

        debug!(node_id = %node_id, "node skipped");
        let mut targets: Vec<&str> = Vec::new();
        for edge in graph.outgoing_edges(node_id) {
            self.edge_states[edge.index] = EdgeState::Skipped;
            if !targets.contains(&edge.target_node_id.as_str()) {
                targets.push(edge.target_node_id.as_str());
            }
        }
        for target in targets {
            self.resolve_target(graph, target, ready);
        }
    }
}

async fn execute_node_with_retry(ctx: NodeContext, info: NodeInfo) -> NodeExecOutcome {
    let max_retries = info
        .retry_config
        .as_ref()
        .map(|rc| rc.max_retries)
        .unwrap_or(0);
    let retry_interval_ms = info
        .retry_config
        .as_ref()
        .map(|rc| rc.retry_interval_ms)
        .unwrap_or(0);

    let mut attempt = 0;
    let result = loop {
        match info.executor.execute(&ctx).await {
            Ok(mut result) => {
                result.retry_index = attempt;
                break Ok(result);
            }
            Err(e) if attempt < max_retries && !e.is_configuration() => {
                attempt += 1;
                warn!(node_id = %ctx.node_id, retry_index = attempt, error = %e, "retrying node");
                ctx.emitter
                    .emit(GraphEngineEvent::NodeRunRetry {
                        id: ctx.exec_id.clone(),
                        node_id: ctx.node_id.clone(),
                        node_type: ctx.node_type,
                        error: e.to_string(),
                        retry_index: attempt,
                        scope: ctx.scope.clone(),
                    })
                    .await;
                if retry_interval_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(retry_interval_ms)).await;
                }
            }
            Err(e) => break apply_error_strategy(info.error_strategy.as_ref(), e, attempt),
        }
    };

    NodeExecOutcome {
        exec_id: ctx.exec_id,
        node_id: ctx.node_id,
        info,
        scope: ctx.scope,
        result,
    }
}

/// Turn a final failure into an `Exception` result when the node asks for it.
fn apply_error_strategy(
    strategy: Option<&ErrorStrategyConfig>,
    error: NodeError,
    retry_index: u32,
) -> Result<NodeRunResult, NodeError> {
    let Some(strategy) = strategy else {
        return Err(error);
    };

    let mut outputs: HashMap<String, Segment> = HashMap::new();
    let handle = match strategy.strategy_type {
        ErrorStrategyType::None => return Err(error),
        ErrorStrategyType::FailBranch => FAIL_BRANCH_HANDLE,
        ErrorStrategyType::DefaultValue => {
            for (key, value) in strategy.default_value.iter().flatten() {
                outputs.insert(key.clone(), Segment::from_value(value));
            }
            SOURCE_HANDLE
        }
    };
    outputs.insert("error_message".to_string(), Segment::String(error.to_string()));
    outputs.insert(
        "error_type".to_string(),
        Segment::String(error.error_type().to_string()),
    );

    let strategy_name = serde_json::to_value(strategy.strategy_type).unwrap_or(Value::Null);
    Ok(NodeRunResult {
        status: WorkflowNodeExecutionStatus::Exception,
        outputs,
        metadata: HashMap::from([(metadata_keys::ERROR_STRATEGY.to_string(), strategy_name)]),
        edge_source_handle: handle.to_string(),
        error: Some(error.to_string()),
        retry_index,
        ..Default::default()
    })
}
