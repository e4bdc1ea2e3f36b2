//! # flowgraph: a graph-based workflow engine
//!
//! `flowgraph` runs Dify-style workflow graphs: typed nodes connected by
//! edges, sharing one variable pool. The crate covers the control-flow
//! machinery:
//!
//! - **Graph engine**: walks the graph from its start node, runs ready nodes
//!   concurrently, resolves branch handles on edges, applies retry and error
//!   strategies, and enforces step and time budgets.
//! - **Variable pool**: `(owner, name)` addressed segments with template
//!   rendering and per-owner cleanup.
//! - **Condition processor**: short-circuit evaluation of comparison
//!   conditions, including element-wise filters over file arrays.
//! - **Control-flow nodes**: start, end, answer, if/else, loop and iteration.
//!   Loop and iteration bodies run in child engines.
//!
//! Business nodes (LLM, HTTP, code, tools) are not built in. Register an
//! implementation of [`NodeExecutor`] for their [`NodeType`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use flowgraph::{parse_graph_config, DslFormat, WorkflowRunner};
//!
//! #[tokio::main]
//! async fn main() {
//!     let yaml = std::fs::read_to_string("workflow.yaml").unwrap();
//!     let config = parse_graph_config(&yaml, DslFormat::Yaml).unwrap();
//!     let handle = WorkflowRunner::builder(config).run().await.unwrap();
//!     while let Some(event) = handle.next_event().await {
//!         println!("{:?}", event);
//!     }
//!     println!("{:?}", handle.wait().await);
//! }
//! ```

pub mod api;
pub mod core;
pub mod domain;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod nodes;

pub use crate::api::{WorkflowHandle, WorkflowRunner, WorkflowRunnerBuilder};
pub use crate::core::{
    EngineConfig, EventScope, FakeIdGenerator, FakeTimeProvider, GraphEngine, GraphEngineEvent,
    GraphRunOutcome, GraphRuntimeState, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, Segment, Selector, StopSignal, TimeProvider, VariablePool,
};
pub use crate::domain::execution::ExecutionStatus;
pub use crate::dsl::{parse_graph_config, DslFormat, GraphConfig, NodeRunResult, NodeType};
pub use crate::error::{NodeError, WorkflowError, WorkflowResult};
pub use crate::evaluator::ConditionProcessor;
pub use crate::graph::Graph;
pub use crate::nodes::{NodeContext, NodeExecutor, NodeExecutorRegistry};
