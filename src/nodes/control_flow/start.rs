use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::variable_pool::Segment;
use crate::dsl::schema::{NodeRunResult, StartNodeData};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor};

/// 开始节点执行器：发布本次运行的用户输入
pub struct StartNodeExecutor;

#[async_trait]
impl NodeExecutor for StartNodeExecutor {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let data: StartNodeData = ctx.parse_config()?;
        let user_inputs = ctx.state.variable_pool.read().user_inputs().clone();

        let mut outputs = HashMap::new();
        for var in &data.variables {
            let value = user_inputs
                .get(&var.variable)
                .filter(|v| !v.is_null())
                .or(var.default.as_ref());
            match value {
                Some(v) => {
                    outputs.insert(var.variable.clone(), Segment::from_value(v));
                }
                None if var.required => {
                    return Err(NodeError::InputValidationError(format!(
                        "{} is required in input form",
                        var.variable
                    )));
                }
                None => {}
            }
        }

        // 未声明的输入原样透传
        for (key, value) in &user_inputs {
            outputs
                .entry(key.clone())
                .or_insert_with(|| Segment::from_value(value));
        }

        Ok(NodeRunResult {
            inputs: user_inputs,
            outputs,
            ..Default::default()
        })
    }
}
