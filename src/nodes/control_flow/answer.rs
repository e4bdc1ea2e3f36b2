use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::event_bus::GraphEngineEvent;
use crate::core::variable_pool::Segment;
use crate::dsl::schema::{AnswerNodeData, NodeRunResult};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor};

/// 回复节点执行器：渲染模板并以流式块输出
pub struct AnswerNodeExecutor;

#[async_trait]
impl NodeExecutor for AnswerNodeExecutor {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let data: AnswerNodeData = ctx.parse_config()?;
        let answer = ctx.state.variable_pool.read().render_template(&data.answer)?;

        ctx.emitter
            .emit(GraphEngineEvent::NodeRunStreamChunk {
                id: ctx.exec_id.clone(),
                node_id: ctx.node_id.clone(),
                node_type: ctx.node_type,
                chunk: answer.clone(),
                scope: ctx.scope.clone(),
            })
            .await;

        Ok(NodeRunResult::succeeded(HashMap::from([(
            "answer".to_string(),
            Segment::String(answer),
        )])))
    }
}
