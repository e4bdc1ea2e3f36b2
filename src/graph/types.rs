use std::collections::HashSet;

use crate::dsl::{FAIL_BRANCH_HANDLE, SOURCE_HANDLE, SUCCESS_BRANCH_HANDLE};

/// 图边
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// 边在图中的序号
    pub index: usize,

    /// 源节点 ID
    pub source_node_id: String,

    /// 目标节点 ID
    pub target_node_id: String,

    /// 运行条件：源节点结果的 edge_source_handle 必须与之相同，None 表示无条件
    pub run_condition: Option<String>,
}

impl GraphEdge {
    /// 从 source_handle 解析运行条件（"source" 视为无条件）
    pub fn run_condition_from_handle(handle: Option<&str>) -> Option<String> {
        match handle {
            None | Some(SOURCE_HANDLE) | Some("") => None,
            Some(h) => Some(h.to_string()),
        }
    }

    /// 节点以 `handle` 结束时该边是否被选中
    ///
    /// 无条件边只在走失败分支时不被选中；"success-branch" 边等同于正常结束。
    pub fn is_taken_by(&self, handle: &str) -> bool {
        match &self.run_condition {
            None => handle != FAIL_BRANCH_HANDLE,
            Some(cond) => {
                cond == handle || (cond == SUCCESS_BRANCH_HANDLE && handle == SOURCE_HANDLE)
            }
        }
    }
}

/// 边的运行时状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeState {
    #[default]
    Unknown,
    Taken,
    Skipped,
}

/// 一组并行分支：同一节点在同一运行条件下的多条出边
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphParallel {
    pub id: String,
    pub start_from_node_id: String,
    pub run_condition: Option<String>,
    pub branches: Vec<ParallelBranch>,
    /// 所有分支都能到达的第一批汇合节点
    pub end_to_node_ids: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelBranch {
    pub start_node_id: String,
    pub node_ids: HashSet<String>,
}
