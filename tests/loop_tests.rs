mod common;

use serde_json::{json, Value};
use std::sync::Arc;

use common::*;
use flowgraph::{EngineConfig, ExecutionStatus, GraphEngineEvent, NodeType, WorkflowRunner};

fn counting_loop(loop_count: usize, initial: i64, break_conditions: Value) -> Value {
    json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "loop1", "data": {
                "type": "loop",
                "title": "Counter",
                "loop_count": loop_count,
                "start_node_id": "loop_start",
                "break_conditions": break_conditions,
                "loop_variables": [
                    {"label": "count", "var_type": "number", "value_type": "constant", "value": initial}
                ]
            }},
            {"id": "loop_start", "data": {"type": "loop-start", "loop_id": "loop1"}},
            {"id": "inc", "data": {"type": "code", "loop_id": "loop1", "target": ["loop1", "count"]}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "count", "value_selector": ["loop1", "count"]},
                {"variable": "index", "value_selector": ["loop1", "index"]},
                {"variable": "body_value", "value_selector": ["inc", "value"]}
            ]}}
        ],
        "edges": [
            {"source": "start", "target": "loop1"},
            {"source": "loop1", "target": "end"},
            {"source": "loop_start", "target": "inc"}
        ]
    })
}

fn loop_succeeded(events: &[GraphEngineEvent]) -> (usize, &std::collections::HashMap<String, Value>) {
    events
        .iter()
        .find_map(|e| match e {
            GraphEngineEvent::LoopRunSucceeded {
                steps, metadata, ..
            } => Some((*steps, metadata)),
            _ => None,
        })
        .expect("loop did not succeed")
}

#[tokio::test]
async fn test_loop_runs_every_round_and_cleans_up() {
    let handle = WorkflowRunner::builder(graph(counting_loop(3, 0, json!([]))))
        .registry(registry_with(NodeType::Code, Arc::new(AddOne)))
        .run()
        .await
        .unwrap();
    let events = collect_events(&handle).await;
    let status = handle.wait().await;

    let out = outputs(&status);
    assert_eq!(out["count"], json!(3));
    // the round index and body outputs do not outlive the loop
    assert_eq!(out["index"], Value::Null);
    assert_eq!(out["body_value"], Value::Null);

    assert_eq!(loop_next_indices(&events), vec![0, 1, 2]);
    let (steps, metadata) = loop_succeeded(&events);
    assert_eq!(steps, 3);
    assert_eq!(metadata["completed_reason"], json!("loop_completed"));
    assert_eq!(metadata["loop_duration_map"].as_object().unwrap().len(), 3);

    let body_indices: Vec<Option<usize>> = events
        .iter()
        .filter(|e| e.node_id() == Some("inc"))
        .filter(|e| matches!(e, GraphEngineEvent::NodeRunStarted { .. }))
        .map(|e| e.scope().and_then(|s| s.loop_index))
        .collect();
    assert_eq!(body_indices, vec![Some(0), Some(1), Some(2)]);
}

#[tokio::test]
async fn test_loop_breaks_when_condition_holds() {
    let conditions = json!([
        {"variable_selector": ["loop1", "count"], "comparison_operator": "≥", "value": 2}
    ]);
    let handle = WorkflowRunner::builder(graph(counting_loop(10, 0, conditions)))
        .registry(registry_with(NodeType::Code, Arc::new(AddOne)))
        .run()
        .await
        .unwrap();
    let events = collect_events(&handle).await;
    let status = handle.wait().await;

    assert_eq!(outputs(&status)["count"], json!(2));
    assert_eq!(loop_next_indices(&events), vec![0, 1]);
    let (steps, metadata) = loop_succeeded(&events);
    assert_eq!(steps, 2);
    assert_eq!(metadata["completed_reason"], json!("loop_break"));
}

#[tokio::test]
async fn test_loop_satisfied_before_first_round() {
    let conditions = json!([
        {"variable_selector": ["loop1", "count"], "comparison_operator": ">", "value": 3}
    ]);
    let handle = WorkflowRunner::builder(graph(counting_loop(5, 7, conditions)))
        .registry(registry_with(NodeType::Code, Arc::new(AddOne)))
        .run()
        .await
        .unwrap();
    let events = collect_events(&handle).await;
    let status = handle.wait().await;

    assert_eq!(outputs(&status)["count"], json!(7));
    assert!(loop_next_indices(&events).is_empty());
    let (steps, metadata) = loop_succeeded(&events);
    assert_eq!(steps, 0);
    assert_eq!(metadata["completed_reason"], json!("loop_break"));
}

#[tokio::test]
async fn test_loop_count_is_clamped_by_config() {
    let config = EngineConfig {
        max_loop_count: 4,
        ..Default::default()
    };
    let handle = WorkflowRunner::builder(graph(counting_loop(50, 0, json!([]))))
        .registry(registry_with(NodeType::Code, Arc::new(AddOne)))
        .config(config)
        .run()
        .await
        .unwrap();
    let events = collect_events(&handle).await;
    let status = handle.wait().await;

    assert_eq!(outputs(&status)["count"], json!(4));
    assert_eq!(loop_next_indices(&events), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_loop_body_failure_fails_the_run() {
    let handle = WorkflowRunner::builder(graph(counting_loop(3, 0, json!([]))))
        .registry(registry_with(NodeType::Code, Arc::new(Boom)))
        .run()
        .await
        .unwrap();
    let events = collect_events(&handle).await;

    match handle.wait().await {
        ExecutionStatus::Failed(error) => {
            assert!(error.contains("Loop loop1 failed at index 0"), "{}", error);
            assert!(error.contains("boom"), "{}", error);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(loop_next_indices(&events), vec![0]);
    assert!(events.iter().any(|e| matches!(
        e,
        GraphEngineEvent::LoopRunFailed { steps: 1, .. }
    )));
    assert!(matches!(
        events.last(),
        Some(GraphEngineEvent::GraphRunFailed { .. })
    ));
}

#[tokio::test]
async fn test_loop_rounds_share_the_step_budget() {
    // start + loop + two body nodes per round
    let config = EngineConfig {
        max_execution_steps: 8,
        ..Default::default()
    };
    let handle = WorkflowRunner::builder(graph(counting_loop(10, 0, json!([]))))
        .registry(registry_with(NodeType::Code, Arc::new(AddOne)))
        .config(config)
        .collect_events(false)
        .run()
        .await
        .unwrap();

    match handle.wait().await {
        ExecutionStatus::Failed(error) => {
            assert!(error.contains("Loop loop1 failed at index 3"), "{}", error);
            assert!(error.contains("Max steps 8 reached"), "{}", error);
        }
        other => panic!("unexpected status {:?}", other),
    }
}

#[tokio::test]
async fn test_loop_variable_seeded_from_pool() {
    let mut config = counting_loop(2, 0, json!([]));
    config["nodes"][0]["data"]["variables"] = json!([{"variable": "seed", "type": "number"}]);
    config["nodes"][1]["data"]["loop_variables"] = json!([
        {"label": "count", "value_type": "variable", "value": ["start", "seed"]}
    ]);
    let handle = WorkflowRunner::builder(graph(config))
        .registry(registry_with(NodeType::Code, Arc::new(AddOne)))
        .user_inputs([("seed".to_string(), json!(40))].into())
        .collect_events(false)
        .run()
        .await
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(outputs(&status)["count"], json!(42));
}
