use std::collections::HashMap;

use flowgraph::{
    parse_graph_config, DslFormat, ExecutionStatus, GraphEngineEvent, WorkflowError,
    WorkflowRunner,
};

const DEMO_WORKFLOW: &str = r#"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - variable: names
          label: Names
          type: array[string]
          required: true
        - variable: mode
          label: Mode
          type: string
          default: greet
  - id: if1
    data:
      type: if-else
      title: Pick Mode
      cases:
        - case_id: greet
          logical_operator: and
          conditions:
            - variable_selector: ["start", "mode"]
              comparison_operator: is
              value: greet
  - id: iter1
    data:
      type: iteration
      title: Greet Everyone
      iterator_selector: ["start", "names"]
      output_selector: ["greeting", "answer"]
      start_node_id: iter_start
      is_parallel: true
      parallel_nums: 2
  - id: iter_start
    data:
      type: iteration-start
      iteration_id: iter1
  - id: greeting
    data:
      type: answer
      iteration_id: iter1
      answer: "Hello, {{#iter1.item#}}!"
  - id: loop1
    data:
      type: loop
      title: Count
      loop_count: 3
      start_node_id: loop_start
  - id: loop_start
    data:
      type: loop-start
      loop_id: loop1
  - id: tick
    data:
      type: answer
      loop_id: loop1
      answer: "tick {{#loop1.index#}}"
  - id: end_greet
    data:
      type: end
      title: Greetings
      outputs:
        - variable: greetings
          value_selector: ["iter1", "output"]
  - id: end_count
    data:
      type: end
      title: Counted
      outputs:
        - variable: mode
          value_selector: ["if1", "selected_case_id"]
edges:
  - source: start
    target: if1
  - source: if1
    sourceHandle: greet
    target: iter1
  - source: if1
    sourceHandle: "false"
    target: loop1
  - source: iter1
    target: end_greet
  - source: loop1
    target: end_count
  - source: iter_start
    target: greeting
  - source: loop_start
    target: tick
"#;

#[tokio::main]
async fn main() -> Result<(), WorkflowError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== flowgraph demo ===\n");

    let config = parse_graph_config(DEMO_WORKFLOW, DslFormat::Yaml)?;
    println!(
        "[OK] workflow parsed ({} nodes, {} edges)",
        config.nodes.len(),
        config.edges.len()
    );

    let inputs = HashMap::from([(
        "names".to_string(),
        serde_json::json!(["Ada", "Grace", "Barbara"]),
    )]);
    let handle = WorkflowRunner::builder(config)
        .user_inputs(inputs)
        .run()
        .await?;

    while let Some(event) = handle.next_event().await {
        match &event {
            GraphEngineEvent::NodeRunStreamChunk { node_id, chunk, .. } => {
                println!("  [{}] {}", node_id, chunk)
            }
            GraphEngineEvent::IterationRunNext { index, .. } => println!("  iteration #{}", index),
            GraphEngineEvent::LoopRunNext { index, .. } => println!("  loop round #{}", index),
            _ => {}
        }
    }

    match handle.wait().await {
        ExecutionStatus::Completed(outputs) => {
            println!("\n=== Workflow completed ===");
            for (k, v) in &outputs {
                println!("  {} = {}", k, v);
            }
        }
        ExecutionStatus::PartialSucceeded {
            outputs,
            exceptions_count,
        } => {
            println!(
                "\n=== Workflow completed with {} recovered failures ===",
                exceptions_count
            );
            for (k, v) in &outputs {
                println!("  {} = {}", k, v);
            }
        }
        ExecutionStatus::Failed(error) => println!("\n=== Workflow failed: {} ===", error),
        ExecutionStatus::Running => println!("\n=== Workflow still running ==="),
    }
    Ok(())
}
