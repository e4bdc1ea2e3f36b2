//! High-level workflow runner and builder.
//!
//! [`WorkflowRunner::builder`] takes a parsed [`GraphConfig`] and wires the
//! variable pool, the executor registry and the [`GraphEngine`] together.
//! [`WorkflowRunnerBuilder::run`] launches the engine on a tokio task and
//! returns a [`WorkflowHandle`].

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::handle::WorkflowHandle;
use crate::core::dispatcher::{EngineConfig, GraphEngine};
use crate::core::event_bus::EventEmitter;
use crate::core::runtime_context::{ExecutionContext, IdGenerator, RuntimeContext, TimeProvider};
use crate::core::runtime_state::GraphRuntimeState;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::ExecutionStatus;
use crate::dsl::schema::GraphConfig;
use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::nodes::executor::NodeExecutorRegistry;

/// Entry point for running a workflow.
pub struct WorkflowRunner;

impl WorkflowRunner {
    /// Create a new builder from a parsed graph config.
    pub fn builder(graph_config: GraphConfig) -> WorkflowRunnerBuilder {
        WorkflowRunnerBuilder {
            graph_config,
            user_inputs: HashMap::new(),
            system_vars: HashMap::new(),
            environment_vars: HashMap::new(),
            conversation_vars: HashMap::new(),
            config: EngineConfig::default(),
            registry: None,
            time_provider: None,
            id_generator: None,
            user_id: None,
            collect_events: true,
        }
    }
}

/// Builder for configuring and launching a workflow run.
pub struct WorkflowRunnerBuilder {
    graph_config: GraphConfig,
    user_inputs: HashMap<String, Value>,
    system_vars: HashMap<String, Value>,
    environment_vars: HashMap<String, Value>,
    conversation_vars: HashMap<String, Value>,
    config: EngineConfig,
    registry: Option<Arc<NodeExecutorRegistry>>,
    time_provider: Option<Arc<dyn TimeProvider>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    user_id: Option<String>,
    collect_events: bool,
}

impl WorkflowRunnerBuilder {
    /// Values the start node publishes.
    pub fn user_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.user_inputs = inputs;
        self
    }

    pub fn system_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.system_vars = vars;
        self
    }

    pub fn environment_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.environment_vars = vars;
        self
    }

    pub fn conversation_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.conversation_vars = vars;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Executors to run nodes with. Defaults to the built-in control-flow set.
    pub fn registry(mut self, registry: Arc<NodeExecutorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = Some(provider);
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// When `false`, no events are produced and `next_event()` returns `None`.
    pub fn collect_events(mut self, collect: bool) -> Self {
        self.collect_events = collect;
        self
    }

    /// Build the graph and launch the workflow, returning a [`WorkflowHandle`].
    ///
    /// Graph construction errors (no start node, cycles, dangling edges) are
    /// returned here; everything after that is reported through the handle.
    pub async fn run(self) -> Result<WorkflowHandle, WorkflowError> {
        let graph = Graph::init(&self.graph_config, None)?;

        let mut runtime = RuntimeContext::default().with_config(self.config.clone());
        if let Some(registry) = self.registry {
            runtime = runtime.with_registry(registry);
        }
        if let Some(provider) = self.time_provider {
            runtime = runtime.with_time_provider(provider);
        }
        if let Some(generator) = self.id_generator {
            runtime = runtime.with_id_generator(generator);
        }
        let workflow_run_id = runtime.id_generator.next_id();
        runtime = runtime.with_execution(ExecutionContext {
            workflow_run_id: workflow_run_id.clone(),
            user_id: self.user_id,
            values: HashMap::new(),
        });

        let pool = VariablePool::with_scopes(
            self.system_vars,
            self.environment_vars,
            self.conversation_vars,
        )
        .with_user_inputs(self.user_inputs);
        let state = GraphRuntimeState::new(pool, runtime.time_provider.now_millis());

        // The engine sees a bounded channel; a forwarding task moves events
        // into the handle's queue so a run never stalls on a slow reader.
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let emitter = if self.collect_events {
            let (tx, mut rx) = mpsc::channel(self.config.event_buffer.max(1));
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if out_tx.send(event).is_err() {
                        break;
                    }
                }
            });
            EventEmitter::new(tx, Arc::new(AtomicBool::new(true)))
        } else {
            drop(out_tx);
            EventEmitter::disabled()
        };

        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Running);
        let stop_signal = runtime.stop_signal.clone();
        let mut engine = GraphEngine::new(
            graph,
            Arc::new(self.graph_config),
            state,
            runtime,
            emitter,
        );

        info!(workflow_run_id = %workflow_run_id, "workflow launched");
        let run_id = workflow_run_id.clone();
        tokio::spawn(async move {
            let status = match engine.run().await {
                Ok(outcome) if outcome.exceptions_count > 0 => ExecutionStatus::PartialSucceeded {
                    outputs: outcome.outputs,
                    exceptions_count: outcome.exceptions_count,
                },
                Ok(outcome) => ExecutionStatus::Completed(outcome.outputs),
                Err(e) => ExecutionStatus::Failed(e.to_string()),
            };
            debug!(workflow_run_id = %run_id, status = ?status, "workflow finished");
            let _ = status_tx.send(status);
        });

        Ok(WorkflowHandle::new(
            workflow_run_id,
            status_rx,
            out_rx,
            stop_signal,
        ))
    }
}
