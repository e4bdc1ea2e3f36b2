use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::is_cyclic_directed;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::dsl::{GraphConfig, NodeConfig, NodeType, SOURCE_HANDLE};
use crate::error::{WorkflowError, WorkflowResult};

use super::types::*;

/// 不可变的图：从某个根节点可达的节点与边
#[derive(Debug, Clone)]
pub struct Graph {
    root_node_id: String,
    /// 可达节点，按广度优先顺序
    node_ids: Vec<String>,
    node_configs: HashMap<String, NodeConfig>,
    edges: Vec<GraphEdge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    parallels: HashMap<String, GraphParallel>,
    /// 节点 ID -> (并行 ID, 分支起始节点 ID)
    node_parallel_mapping: HashMap<String, (String, String)>,
    topology: StableDiGraph<String, usize>,
    node_index_map: HashMap<String, NodeIndex>,
}

impl Graph {
    /// 从图配置构建以 `root_node_id` 为根的图
    ///
    /// 未指定根节点时，选择没有入边的 start 节点。
    pub fn init(config: &GraphConfig, root_node_id: Option<&str>) -> WorkflowResult<Graph> {
        // 1. 索引全部节点
        let mut all_nodes: HashMap<&str, &NodeConfig> = HashMap::new();
        for node in &config.nodes {
            if all_nodes.insert(node.id.as_str(), node).is_some() {
                return Err(WorkflowError::GraphBuildError(format!(
                    "Duplicate node id: {}",
                    node.id
                )));
            }
        }

        let mut config_edges: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut has_incoming: HashSet<&str> = HashSet::new();
        for (i, edge) in config.edges.iter().enumerate() {
            config_edges.entry(edge.source.as_str()).or_default().push(i);
            has_incoming.insert(edge.target.as_str());
        }

        // 2. 确定根节点
        let root_node_id = match root_node_id {
            Some(id) => {
                if !all_nodes.contains_key(id) {
                    return Err(WorkflowError::GraphNotFound(id.to_string()));
                }
                id.to_string()
            }
            None => config
                .nodes
                .iter()
                .find(|n| n.data.node_type == NodeType::Start && !has_incoming.contains(n.id.as_str()))
                .map(|n| n.id.clone())
                .ok_or(WorkflowError::NoStartNode)?,
        };

        // 3. 广度优先收集可达节点与边
        let mut node_ids = vec![root_node_id.clone()];
        let mut visited: HashSet<String> = HashSet::from([root_node_id.clone()]);
        let mut queue = VecDeque::from([root_node_id.clone()]);
        let mut reachable_edges = Vec::new();
        while let Some(node_id) = queue.pop_front() {
            for &i in config_edges.get(node_id.as_str()).into_iter().flatten() {
                let edge = &config.edges[i];
                if !all_nodes.contains_key(edge.target.as_str()) {
                    return Err(WorkflowError::GraphBuildError(format!(
                        "Target node not found: {}",
                        edge.target
                    )));
                }
                reachable_edges.push(i);
                if visited.insert(edge.target.clone()) {
                    node_ids.push(edge.target.clone());
                    queue.push_back(edge.target.clone());
                }
            }
        }

        // 4. 建立拓扑并检查环
        let mut topology = StableDiGraph::<String, usize>::new();
        let mut node_index_map = HashMap::new();
        for id in &node_ids {
            node_index_map.insert(id.clone(), topology.add_node(id.clone()));
        }

        let mut edges = Vec::with_capacity(reachable_edges.len());
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for i in reachable_edges {
            let cfg = &config.edges[i];
            let index = edges.len();
            let edge = GraphEdge {
                index,
                source_node_id: cfg.source.clone(),
                target_node_id: cfg.target.clone(),
                run_condition: GraphEdge::run_condition_from_handle(cfg.source_handle.as_deref()),
            };
            topology.add_edge(node_index_map[&cfg.source], node_index_map[&cfg.target], index);
            outgoing.entry(cfg.source.clone()).or_default().push(index);
            incoming.entry(cfg.target.clone()).or_default().push(index);
            edges.push(edge);
        }

        if is_cyclic_directed(&topology) {
            return Err(WorkflowError::CycleDetected);
        }

        let node_configs = node_ids
            .iter()
            .filter_map(|id| all_nodes.get(id.as_str()).map(|n| (id.clone(), (*n).clone())))
            .collect();

        let mut graph = Graph {
            root_node_id,
            node_ids,
            node_configs,
            edges,
            outgoing,
            incoming,
            parallels: HashMap::new(),
            node_parallel_mapping: HashMap::new(),
            topology,
            node_index_map,
        };
        graph.collect_parallels();
        Ok(graph)
    }

    pub fn root_node_id(&self) -> &str {
        &self.root_node_id
    }

    /// 图中全部节点 ID（用于按节点批量清理变量）
    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_configs.contains_key(node_id)
    }

    pub fn node_config(&self, node_id: &str) -> Option<&NodeConfig> {
        self.node_configs.get(node_id)
    }

    pub fn edge(&self, index: usize) -> Option<&GraphEdge> {
        self.edges.get(index)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn outgoing_edges(&self, node_id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.outgoing
            .get(node_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn incoming_edges(&self, node_id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.incoming
            .get(node_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn parallels(&self) -> impl Iterator<Item = &GraphParallel> {
        self.parallels.values()
    }

    pub fn parallel(&self, parallel_id: &str) -> Option<&GraphParallel> {
        self.parallels.get(parallel_id)
    }

    /// 节点所属的最内层并行分支：(并行, 分支起始节点 ID)
    pub fn parallel_of(&self, node_id: &str) -> Option<(&GraphParallel, &str)> {
        let (parallel_id, branch_start) = self.node_parallel_mapping.get(node_id)?;
        Some((self.parallels.get(parallel_id)?, branch_start.as_str()))
    }

    /// 节点的全部后继（不含自身）
    pub fn descendants(&self, node_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(&start) = self.node_index_map.get(node_id) else {
            return seen;
        };
        let mut dfs = petgraph::visit::Dfs::new(&self.topology, start);
        while let Some(idx) = dfs.next(&self.topology) {
            if idx != start {
                if let Some(id) = self.topology.node_weight(idx) {
                    seen.insert(id.clone());
                }
            }
        }
        seen
    }

    fn collect_parallels(&mut self) {
        let mut parallels = Vec::new();
        for node_id in &self.node_ids {
            // 按运行条件分组出边，保持出现顺序
            let mut groups: Vec<(Option<String>, Vec<String>)> = Vec::new();
            for edge in self.outgoing_edges(node_id) {
                match groups.iter_mut().find(|(cond, _)| *cond == edge.run_condition) {
                    Some((_, targets)) => {
                        if !targets.contains(&edge.target_node_id) {
                            targets.push(edge.target_node_id.clone());
                        }
                    }
                    None => groups.push((
                        edge.run_condition.clone(),
                        vec![edge.target_node_id.clone()],
                    )),
                }
            }

            for (run_condition, targets) in groups.into_iter().filter(|(_, t)| t.len() > 1) {
                let reach: Vec<HashSet<String>> = targets
                    .iter()
                    .map(|t| {
                        let mut set = self.descendants(t);
                        set.insert(t.clone());
                        set
                    })
                    .collect();
                let mut common = reach[0].clone();
                for set in &reach[1..] {
                    common.retain(|id| set.contains(id));
                }
                let end_to_node_ids = common
                    .iter()
                    .filter(|id| {
                        self.incoming_edges(id)
                            .any(|e| !common.contains(&e.source_node_id))
                    })
                    .cloned()
                    .collect();
                let branches = targets
                    .iter()
                    .zip(reach)
                    .map(|(t, set)| ParallelBranch {
                        start_node_id: t.clone(),
                        node_ids: set.difference(&common).cloned().collect(),
                    })
                    .collect();
                parallels.push(GraphParallel {
                    id: format!(
                        "parallel-{}-{}",
                        node_id,
                        run_condition.as_deref().unwrap_or(SOURCE_HANDLE)
                    ),
                    start_from_node_id: node_id.clone(),
                    run_condition,
                    branches,
                    end_to_node_ids,
                });
            }
        }

        // 外层并行先登记，内层覆盖
        for parallel in parallels {
            for branch in &parallel.branches {
                for id in &branch.node_ids {
                    self.node_parallel_mapping
                        .insert(id.clone(), (parallel.id.clone(), branch.start_node_id.clone()));
                }
            }
            self.parallels.insert(parallel.id.clone(), parallel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> GraphConfig {
        serde_json::from_value(value).unwrap()
    }

    fn loop_workflow() -> GraphConfig {
        config(json!({
            "nodes": [
                {"id": "start", "data": {"type": "start"}},
                {"id": "loop", "data": {"type": "loop", "loop_count": 3, "start_node_id": "loop_start"}},
                {"id": "loop_start", "data": {"type": "loop-start", "loop_id": "loop"}},
                {"id": "body", "data": {"type": "code", "loop_id": "loop"}},
                {"id": "end", "data": {"type": "end"}}
            ],
            "edges": [
                {"source": "start", "target": "loop"},
                {"source": "loop", "target": "end"},
                {"source": "loop_start", "target": "body"}
            ]
        }))
    }

    #[test]
    fn test_root_discovery_excludes_bodies() {
        let graph = Graph::init(&loop_workflow(), None).unwrap();
        assert_eq!(graph.root_node_id(), "start");
        assert_eq!(graph.node_ids(), &["start", "loop", "end"]);
        assert!(!graph.contains("body"));
    }

    #[test]
    fn test_body_slice() {
        let body = Graph::init(&loop_workflow(), Some("loop_start")).unwrap();
        assert_eq!(body.node_ids(), &["loop_start", "body"]);
        assert_eq!(body.outgoing_edges("loop_start").count(), 1);
        assert_eq!(body.incoming_edges("body").count(), 1);
    }

    #[test]
    fn test_root_not_found() {
        let err = Graph::init(&loop_workflow(), Some("missing")).unwrap_err();
        assert!(matches!(err, WorkflowError::GraphNotFound(ref id) if id == "missing"));
    }

    #[test]
    fn test_no_start_node() {
        let cfg = config(json!({"nodes": [{"id": "a", "data": {"type": "code"}}], "edges": []}));
        assert!(matches!(Graph::init(&cfg, None), Err(WorkflowError::NoStartNode)));
    }

    #[test]
    fn test_cycle_detected() {
        let cfg = config(json!({
            "nodes": [
                {"id": "start", "data": {"type": "start"}},
                {"id": "a", "data": {"type": "code"}},
                {"id": "b", "data": {"type": "code"}}
            ],
            "edges": [
                {"source": "start", "target": "a"},
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"}
            ]
        }));
        assert!(matches!(Graph::init(&cfg, None), Err(WorkflowError::CycleDetected)));
    }

    #[test]
    fn test_branch_run_conditions() {
        let cfg = config(json!({
            "nodes": [
                {"id": "start", "data": {"type": "start"}},
                {"id": "if", "data": {"type": "if-else"}},
                {"id": "yes", "data": {"type": "end"}},
                {"id": "no", "data": {"type": "end"}}
            ],
            "edges": [
                {"source": "start", "target": "if", "sourceHandle": "source"},
                {"source": "if", "target": "yes", "sourceHandle": "case_1"},
                {"source": "if", "target": "no", "sourceHandle": "false"}
            ]
        }));
        let graph = Graph::init(&cfg, None).unwrap();
        let conds: Vec<_> = graph
            .outgoing_edges("if")
            .map(|e| e.run_condition.clone())
            .collect();
        assert_eq!(conds, vec![Some("case_1".into()), Some("false".into())]);
        assert!(graph.outgoing_edges("start").all(|e| e.run_condition.is_none()));
        assert_eq!(graph.parallels().count(), 0);
    }

    #[test]
    fn test_parallel_detection() {
        let cfg = config(json!({
            "nodes": [
                {"id": "start", "data": {"type": "start"}},
                {"id": "a", "data": {"type": "code"}},
                {"id": "b", "data": {"type": "code"}},
                {"id": "b2", "data": {"type": "code"}},
                {"id": "join", "data": {"type": "end"}}
            ],
            "edges": [
                {"source": "start", "target": "a"},
                {"source": "start", "target": "b"},
                {"source": "b", "target": "b2"},
                {"source": "a", "target": "join"},
                {"source": "b2", "target": "join"}
            ]
        }));
        let graph = Graph::init(&cfg, None).unwrap();
        let parallel = graph.parallels().next().unwrap();
        assert_eq!(parallel.start_from_node_id, "start");
        assert_eq!(parallel.branches.len(), 2);
        assert!(parallel.end_to_node_ids.contains("join"));
        let (p, branch) = graph.parallel_of("b2").unwrap();
        assert_eq!(p.id, parallel.id);
        assert_eq!(branch, "b");
        assert!(graph.parallel_of("join").is_none());
        assert_eq!(graph.descendants("b"), HashSet::from(["b2".to_string(), "join".to_string()]));
    }
}
