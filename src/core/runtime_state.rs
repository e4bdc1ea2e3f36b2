use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::variable_pool::VariablePool;
use crate::dsl::LlmUsage;

/// Mutable state of one graph run.
///
/// Cloning is cheap and shares everything. Child engines of a loop or a
/// sequential iteration get a clone; parallel iteration branches get
/// [`GraphRuntimeState::with_isolated_pool`] so that only the pool is private.
/// Step count, usage and start time always stay shared with the top-level run.
#[derive(Clone, Debug)]
pub struct GraphRuntimeState {
    pub variable_pool: Arc<RwLock<VariablePool>>,
    llm_usage: Arc<Mutex<LlmUsage>>,
    node_run_steps: Arc<AtomicUsize>,
    start_at_millis: i64,
}

impl GraphRuntimeState {
    pub fn new(variable_pool: VariablePool, start_at_millis: i64) -> Self {
        Self {
            variable_pool: Arc::new(RwLock::new(variable_pool)),
            llm_usage: Arc::new(Mutex::new(LlmUsage::default())),
            node_run_steps: Arc::new(AtomicUsize::new(0)),
            start_at_millis,
        }
    }

    /// Same run, private pool.
    pub fn with_isolated_pool(&self, variable_pool: VariablePool) -> Self {
        Self {
            variable_pool: Arc::new(RwLock::new(variable_pool)),
            ..self.clone()
        }
    }

    pub fn start_at_millis(&self) -> i64 {
        self.start_at_millis
    }

    pub fn add_usage(&self, usage: &LlmUsage) {
        self.llm_usage.lock().add(usage);
    }

    pub fn llm_usage(&self) -> LlmUsage {
        self.llm_usage.lock().clone()
    }

    /// Counts one more node step and returns the new total.
    pub fn increment_steps(&self) -> usize {
        self.node_run_steps.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn steps(&self) -> usize {
        self.node_run_steps.load(Ordering::SeqCst)
    }
}
