use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::dispatcher::GraphEngine;
use crate::core::event_bus::{EventEmitter, EventScope};
use crate::core::runtime_context::RuntimeContext;
use crate::core::runtime_state::GraphRuntimeState;
use crate::dsl::schema::{GraphConfig, NodeRunResult, NodeType};
use crate::error::NodeError;
use crate::graph::Graph;

/// Trait for node execution. Each node type implements this.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Execute the node, returning a NodeRunResult.
    ///
    /// Outputs are written to the variable pool by the engine, not by the
    /// executor.
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError>;
}

/// Everything a node sees while it runs. Owned, so it can move into a task.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: String,
    /// Id of this execution, shared by all of its events.
    pub exec_id: String,
    pub node_type: NodeType,
    pub title: String,
    pub config: Value,
    /// The whole workflow config, for slicing loop and iteration bodies.
    pub graph_config: Arc<GraphConfig>,
    pub state: GraphRuntimeState,
    pub runtime: RuntimeContext,
    pub emitter: EventEmitter,
    pub scope: EventScope,
}

impl NodeContext {
    /// Decode the node-specific part of the config.
    pub fn parse_config<T: DeserializeOwned>(&self) -> Result<T, NodeError> {
        serde_json::from_value(self.config.clone()).map_err(|e| {
            NodeError::ConfigError(format!("Invalid {} config: {}", self.node_type, e))
        })
    }

    /// Slice the body rooted at `start_node_id`.
    pub fn body_graph(&self, start_node_id: &str) -> Result<Graph, NodeError> {
        Graph::init(&self.graph_config, Some(start_node_id))
            .map_err(|e| NodeError::ConfigError(e.to_string()))
    }

    /// Child engine over `graph`, writing into `state` and tagging its events
    /// with `scope`.
    pub fn child_engine(
        &self,
        graph: Graph,
        state: GraphRuntimeState,
        scope: EventScope,
    ) -> GraphEngine {
        GraphEngine::sub_graph(
            graph,
            self.graph_config.clone(),
            state,
            self.runtime.clone(),
            self.emitter.clone(),
            scope,
        )
    }
}

/// Registry of node executors keyed by `(node type, version)`.
pub struct NodeExecutorRegistry {
    executors: HashMap<NodeType, HashMap<String, Arc<dyn NodeExecutor>>>,
}

impl NodeExecutorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        NodeExecutorRegistry {
            executors: HashMap::new(),
        }
    }

    /// Registry with the control-flow executors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::Start, "1", Arc::new(super::control_flow::StartNodeExecutor));
        registry.register(NodeType::End, "1", Arc::new(super::control_flow::EndNodeExecutor));
        registry.register(NodeType::Answer, "1", Arc::new(super::control_flow::AnswerNodeExecutor));
        registry.register(
            NodeType::IfElse,
            "1",
            Arc::new(super::control_flow::IfElseNodeExecutor::new()),
        );
        registry.register(NodeType::Loop, "1", Arc::new(super::flow::LoopNodeExecutor::new()));
        registry.register(NodeType::LoopStart, "1", Arc::new(super::flow::PassThroughExecutor));
        registry.register(
            NodeType::Iteration,
            "1",
            Arc::new(super::flow::IterationNodeExecutor::new()),
        );
        registry.register(NodeType::IterationStart, "1", Arc::new(super::flow::PassThroughExecutor));
        registry
    }

    pub fn register(
        &mut self,
        node_type: NodeType,
        version: impl Into<String>,
        executor: Arc<dyn NodeExecutor>,
    ) {
        self.executors
            .entry(node_type)
            .or_default()
            .insert(version.into(), executor);
    }

    /// Exact version if registered, otherwise the latest version of the type.
    pub fn get(&self, node_type: NodeType, version: &str) -> Option<Arc<dyn NodeExecutor>> {
        let versions = self.executors.get(&node_type)?;
        if let Some(executor) = versions.get(version) {
            return Some(executor.clone());
        }
        versions
            .iter()
            .max_by_key(|(v, _)| v.parse::<u32>().unwrap_or(0))
            .map(|(_, e)| e.clone())
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }
}

impl Default for NodeExecutorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
