use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::variable_pool::Segment;
use crate::dsl::schema::{EndNodeData, NodeRunResult};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor};

/// 结束节点执行器：按 value_selector 收集工作流输出
pub struct EndNodeExecutor;

#[async_trait]
impl NodeExecutor for EndNodeExecutor {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let data: EndNodeData = ctx.parse_config()?;

        let outputs: HashMap<String, Segment> = {
            let pool = ctx.state.variable_pool.read();
            data.outputs
                .iter()
                .map(|out| {
                    // 缺失的变量输出为 None
                    let value = pool.resolve(&out.value_selector).unwrap_or(Segment::None);
                    (out.variable.clone(), value)
                })
                .collect()
        };

        Ok(NodeRunResult {
            inputs: outputs.iter().map(|(k, v)| (k.clone(), v.to_value())).collect(),
            outputs,
            ..Default::default()
        })
    }
}
