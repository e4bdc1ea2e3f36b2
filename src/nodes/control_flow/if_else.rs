use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::core::variable_pool::Segment;
use crate::domain::model::IfElseNodeConfig;
use crate::dsl::schema::NodeRunResult;
use crate::error::NodeError;
use crate::evaluator::ConditionProcessor;
use crate::nodes::executor::{NodeContext, NodeExecutor};

/// 没有任何 case 命中时选择的分支
pub const ELSE_HANDLE: &str = "false";

/// If/Else 条件分支节点执行器
pub struct IfElseNodeExecutor {
    processor: ConditionProcessor,
}

impl IfElseNodeExecutor {
    pub fn new() -> Self {
        IfElseNodeExecutor {
            processor: ConditionProcessor::new(),
        }
    }
}

impl Default for IfElseNodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for IfElseNodeExecutor {
    async fn execute(&self, ctx: &NodeContext) -> Result<NodeRunResult, NodeError> {
        let config: IfElseNodeConfig = ctx.parse_config()?;
        let cases = config.resolved_cases();

        let mut condition_results: Vec<Value> = Vec::new();
        let mut evaluated_inputs: Vec<Value> = Vec::new();
        let mut selected_case: Option<String> = None;

        {
            let pool = ctx.state.variable_pool.read();
            // 按顺序评估 case，命中第一个即停止
            for case in &cases {
                let check = self
                    .processor
                    .process_conditions(&pool, &case.conditions, case.logical_operator)?;
                evaluated_inputs.extend(check.inputs.iter().map(|i| json!(i)));
                condition_results.push(json!({
                    "case_id": case.case_id,
                    "group_results": check.group_results,
                    "final_result": check.final_result,
                }));
                if check.final_result {
                    selected_case = Some(case.case_id.clone());
                    break;
                }
            }
        }

        let handle = selected_case
            .clone()
            .unwrap_or_else(|| ELSE_HANDLE.to_string());

        let mut outputs = HashMap::from([(
            "result".to_string(),
            Segment::Boolean(selected_case.is_some()),
        )]);
        // 未命中时不写入 selected_case_id
        if let Some(case_id) = selected_case {
            outputs.insert("selected_case_id".to_string(), Segment::String(case_id));
        }

        Ok(NodeRunResult {
            inputs: HashMap::from([("conditions".to_string(), Value::Array(evaluated_inputs))]),
            process_data: HashMap::from([(
                "condition_results".to_string(),
                Value::Array(condition_results),
            )]),
            outputs,
            edge_source_handle: handle,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variable_pool::{Selector, VariablePool};
    use crate::dsl::schema::NodeType;
    use crate::nodes::control_flow::test_support::node_context;

    fn pool_with_score(score: i64) -> VariablePool {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "score"), score);
        pool
    }

    fn cases_config() -> Value {
        json!({"cases": [
            {"case_id": "high", "logical_operator": "and", "conditions": [
                {"variable_selector": ["start", "score"], "comparison_operator": ">", "value": "80"}
            ]},
            {"case_id": "mid", "conditions": [
                {"variable_selector": ["start", "score"], "comparison_operator": ">", "value": "50"}
            ]}
        ]})
    }

    #[tokio::test]
    async fn test_first_matching_case_wins() {
        let (ctx, _rx) = node_context("if1", NodeType::IfElse, cases_config(), pool_with_score(90));
        let result = IfElseNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.edge_source_handle, "high");
        assert_eq!(result.outputs["result"], Segment::Boolean(true));
        assert_eq!(result.outputs["selected_case_id"], Segment::String("high".into()));
        // 命中后不再评估后续 case
        assert_eq!(result.process_data["condition_results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_case() {
        let (ctx, _rx) = node_context("if1", NodeType::IfElse, cases_config(), pool_with_score(60));
        let result = IfElseNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.edge_source_handle, "mid");
    }

    #[tokio::test]
    async fn test_no_case_matches() {
        let (ctx, _rx) = node_context("if1", NodeType::IfElse, cases_config(), pool_with_score(10));
        let result = IfElseNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.edge_source_handle, ELSE_HANDLE);
        assert_eq!(result.outputs["result"], Segment::Boolean(false));
        assert!(!result.outputs.contains_key("selected_case_id"));
    }

    #[tokio::test]
    async fn test_else_branch_leaves_selected_case_unset() {
        let (ctx, _rx) = node_context("if1", NodeType::IfElse, cases_config(), pool_with_score(10));
        let result = IfElseNodeExecutor::new().execute(&ctx).await.unwrap();
        let mut pool = ctx.state.variable_pool.write();
        pool.set_node_outputs("if1", &result.outputs);
        assert!(pool.has(&Selector::new("if1", "result")));
        assert!(!pool.has(&Selector::new("if1", "selected_case_id")));
    }

    #[tokio::test]
    async fn test_legacy_conditions() {
        let config = json!({
            "logical_operator": "and",
            "conditions": [
                {"variable_selector": ["start", "score"], "comparison_operator": "=", "value": "5"}
            ]
        });
        let (ctx, _rx) = node_context("if1", NodeType::IfElse, config, pool_with_score(5));
        let result = IfElseNodeExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(result.edge_source_handle, "true");
    }

    #[tokio::test]
    async fn test_missing_variable_fails() {
        let (ctx, _rx) = node_context("if1", NodeType::IfElse, cases_config(), VariablePool::new());
        let err = IfElseNodeExecutor::new().execute(&ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::VariableNotFound(_)));
    }
}
