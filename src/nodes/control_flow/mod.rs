pub mod answer;
pub mod end;
pub mod if_else;
pub mod start;

pub use answer::AnswerNodeExecutor;
pub use end::EndNodeExecutor;
pub use if_else::IfElseNodeExecutor;
pub use start::StartNodeExecutor;

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::core::event_bus::{EventEmitter, EventScope, GraphEngineEvent};
    use crate::core::runtime_context::RuntimeContext;
    use crate::core::runtime_state::GraphRuntimeState;
    use crate::core::variable_pool::VariablePool;
    use crate::dsl::schema::{GraphConfig, NodeType};
    use crate::nodes::executor::NodeContext;

    /// Context for calling an executor directly, outside an engine.
    pub fn node_context(
        node_id: &str,
        node_type: NodeType,
        config: Value,
        pool: VariablePool,
    ) -> (NodeContext, mpsc::Receiver<GraphEngineEvent>) {
        let (emitter, rx) = EventEmitter::channel(64);
        let ctx = NodeContext {
            node_id: node_id.to_string(),
            exec_id: format!("{}-exec", node_id),
            node_type,
            title: node_id.to_string(),
            config,
            graph_config: Arc::new(GraphConfig::default()),
            state: GraphRuntimeState::new(pool, 0),
            runtime: RuntimeContext::default(),
            emitter,
            scope: EventScope::default(),
        };
        (ctx, rx)
    }
}
