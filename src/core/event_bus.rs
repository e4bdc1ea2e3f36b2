//! Engine events and the channel they travel on.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::dsl::{LlmUsage, NodeRunResult, NodeType};

/// Where an event came from: enough to rebuild per-loop, per-iteration and
/// per-branch timelines from an interleaved stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventScope {
    pub in_loop_id: Option<String>,
    pub loop_index: Option<usize>,
    pub in_iteration_id: Option<String>,
    pub iteration_index: Option<usize>,
    pub parallel_mode_run_id: Option<String>,
    pub parallel_id: Option<String>,
    pub parallel_start_node_id: Option<String>,
}

impl EventScope {
    pub fn in_loop(&self, loop_id: &str, index: usize) -> Self {
        EventScope {
            in_loop_id: Some(loop_id.to_string()),
            loop_index: Some(index),
            parallel_id: None,
            parallel_start_node_id: None,
            ..self.clone()
        }
    }

    pub fn in_iteration(&self, iteration_id: &str, index: usize, parallel_mode_run_id: Option<String>) -> Self {
        EventScope {
            in_iteration_id: Some(iteration_id.to_string()),
            iteration_index: Some(index),
            parallel_mode_run_id,
            parallel_id: None,
            parallel_start_node_id: None,
            ..self.clone()
        }
    }

    pub fn in_parallel(&self, parallel_id: &str, start_node_id: &str) -> Self {
        EventScope {
            parallel_id: Some(parallel_id.to_string()),
            parallel_start_node_id: Some(start_node_id.to_string()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    // --- graph ---
    GraphRunStarted,
    GraphRunSucceeded {
        outputs: HashMap<String, Value>,
    },
    GraphRunPartialSucceeded {
        outputs: HashMap<String, Value>,
        exceptions_count: usize,
    },
    GraphRunFailed {
        error: String,
        exceptions_count: usize,
        llm_usage: LlmUsage,
    },

    // --- node ---
    NodeRunStarted {
        id: String,
        node_id: String,
        node_type: NodeType,
        node_title: String,
        predecessor_node_id: Option<String>,
        scope: EventScope,
    },
    NodeRunStreamChunk {
        id: String,
        node_id: String,
        node_type: NodeType,
        chunk: String,
        scope: EventScope,
    },
    /// Terminal wrapper of a node's own event sequence.
    NodeRunStreamCompleted {
        id: String,
        node_id: String,
        node_type: NodeType,
        result: NodeRunResult,
        scope: EventScope,
    },
    NodeRunSucceeded {
        id: String,
        node_id: String,
        node_type: NodeType,
        result: NodeRunResult,
        scope: EventScope,
    },
    NodeRunFailed {
        id: String,
        node_id: String,
        node_type: NodeType,
        error: String,
        scope: EventScope,
    },
    NodeRunException {
        id: String,
        node_id: String,
        node_type: NodeType,
        error: String,
        result: NodeRunResult,
        scope: EventScope,
    },
    NodeRunRetry {
        id: String,
        node_id: String,
        node_type: NodeType,
        error: String,
        retry_index: u32,
        scope: EventScope,
    },

    // --- loop ---
    LoopRunStarted {
        id: String,
        loop_id: String,
        inputs: HashMap<String, Value>,
        scope: EventScope,
    },
    LoopRunNext {
        id: String,
        loop_id: String,
        index: usize,
        scope: EventScope,
    },
    LoopRunSucceeded {
        id: String,
        loop_id: String,
        outputs: HashMap<String, Value>,
        steps: usize,
        metadata: HashMap<String, Value>,
        scope: EventScope,
    },
    LoopRunFailed {
        id: String,
        loop_id: String,
        error: String,
        steps: usize,
        metadata: HashMap<String, Value>,
        scope: EventScope,
    },

    // --- iteration ---
    IterationRunStarted {
        id: String,
        iteration_id: String,
        inputs: HashMap<String, Value>,
        scope: EventScope,
    },
    IterationRunNext {
        id: String,
        iteration_id: String,
        index: usize,
        scope: EventScope,
    },
    IterationRunSucceeded {
        id: String,
        iteration_id: String,
        outputs: HashMap<String, Value>,
        steps: usize,
        metadata: HashMap<String, Value>,
        scope: EventScope,
    },
    IterationRunFailed {
        id: String,
        iteration_id: String,
        error: String,
        steps: usize,
        metadata: HashMap<String, Value>,
        scope: EventScope,
    },

    // --- parallel branches ---
    ParallelBranchRunStarted {
        parallel_id: String,
        parallel_start_node_id: String,
        scope: EventScope,
    },
    ParallelBranchRunSucceeded {
        parallel_id: String,
        parallel_start_node_id: String,
        scope: EventScope,
    },
    ParallelBranchRunFailed {
        parallel_id: String,
        parallel_start_node_id: String,
        error: String,
        scope: EventScope,
    },
}

impl GraphEngineEvent {
    /// `true` for the two events that end a top-level run.
    pub fn is_graph_terminal(&self) -> bool {
        matches!(
            self,
            GraphEngineEvent::GraphRunSucceeded { .. }
                | GraphEngineEvent::GraphRunPartialSucceeded { .. }
                | GraphEngineEvent::GraphRunFailed { .. }
        )
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphEngineEvent::NodeRunStarted { node_id, .. }
            | GraphEngineEvent::NodeRunStreamChunk { node_id, .. }
            | GraphEngineEvent::NodeRunStreamCompleted { node_id, .. }
            | GraphEngineEvent::NodeRunSucceeded { node_id, .. }
            | GraphEngineEvent::NodeRunFailed { node_id, .. }
            | GraphEngineEvent::NodeRunException { node_id, .. }
            | GraphEngineEvent::NodeRunRetry { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    pub fn scope(&self) -> Option<&EventScope> {
        match self {
            GraphEngineEvent::GraphRunStarted
            | GraphEngineEvent::GraphRunSucceeded { .. }
            | GraphEngineEvent::GraphRunPartialSucceeded { .. }
            | GraphEngineEvent::GraphRunFailed { .. } => None,
            GraphEngineEvent::NodeRunStarted { scope, .. }
            | GraphEngineEvent::NodeRunStreamChunk { scope, .. }
            | GraphEngineEvent::NodeRunStreamCompleted { scope, .. }
            | GraphEngineEvent::NodeRunSucceeded { scope, .. }
            | GraphEngineEvent::NodeRunFailed { scope, .. }
            | GraphEngineEvent::NodeRunException { scope, .. }
            | GraphEngineEvent::NodeRunRetry { scope, .. }
            | GraphEngineEvent::LoopRunStarted { scope, .. }
            | GraphEngineEvent::LoopRunNext { scope, .. }
            | GraphEngineEvent::LoopRunSucceeded { scope, .. }
            | GraphEngineEvent::LoopRunFailed { scope, .. }
            | GraphEngineEvent::IterationRunStarted { scope, .. }
            | GraphEngineEvent::IterationRunNext { scope, .. }
            | GraphEngineEvent::IterationRunSucceeded { scope, .. }
            | GraphEngineEvent::IterationRunFailed { scope, .. }
            | GraphEngineEvent::ParallelBranchRunStarted { scope, .. }
            | GraphEngineEvent::ParallelBranchRunSucceeded { scope, .. }
            | GraphEngineEvent::ParallelBranchRunFailed { scope, .. } => Some(scope),
        }
    }
}

/// Sender wrapper for engine events, with an atomic active flag so that event
/// emission can be cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<GraphEngineEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<GraphEngineEvent>, active: Arc<AtomicBool>) -> Self {
        Self { tx, active }
    }

    /// Bounded channel of `capacity` plus an active emitter feeding it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GraphEngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, Arc::new(AtomicBool::new(true))), rx)
    }

    /// Emitter whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx, Arc::new(AtomicBool::new(false)))
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn emit(&self, event: GraphEngineEvent) {
        if self.is_active() && self.tx.send(event).await.is_err() {
            // Receiver is gone; stop paying for events nobody reads.
            self.active.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emitter_delivers_in_order() {
        let (emitter, mut rx) = EventEmitter::channel(8);
        emitter.emit(GraphEngineEvent::GraphRunStarted).await;
        emitter
            .emit(GraphEngineEvent::GraphRunSucceeded {
                outputs: HashMap::new(),
            })
            .await;
        assert_eq!(rx.recv().await, Some(GraphEngineEvent::GraphRunStarted));
        assert!(rx.recv().await.unwrap().is_graph_terminal());
    }

    #[tokio::test]
    async fn test_emitter_deactivates_when_receiver_dropped() {
        let (emitter, rx) = EventEmitter::channel(1);
        drop(rx);
        emitter.emit(GraphEngineEvent::GraphRunStarted).await;
        assert!(!emitter.is_active());
        assert!(!EventEmitter::disabled().is_active());
    }

    #[test]
    fn test_scope_nesting() {
        let outer = EventScope::default().in_parallel("p1", "a");
        let looped = outer.in_loop("loop", 2);
        assert_eq!(looped.loop_index, Some(2));
        assert_eq!(looped.parallel_id, None);
        let iter = looped.in_iteration("it", 0, Some("run-1".into()));
        assert_eq!(iter.in_loop_id.as_deref(), Some("loop"));
        assert_eq!(iter.parallel_mode_run_id.as_deref(), Some("run-1"));
    }
}
