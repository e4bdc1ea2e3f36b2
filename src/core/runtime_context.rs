use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::dispatcher::EngineConfig;
use crate::core::stop_signal::StopSignal;
use crate::error::WorkflowError;
use crate::nodes::executor::NodeExecutorRegistry;

/// Request-scoped values handed explicitly to every spawned worker.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub workflow_run_id: String,
    pub user_id: Option<String>,
    pub values: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(workflow_run_id: impl Into<String>) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            ..Default::default()
        }
    }
}

/// Runtime services shared by an engine and every child engine it starts.
#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub registry: Arc<NodeExecutorRegistry>,
    pub config: EngineConfig,
    pub execution: ExecutionContext,
    pub stop_signal: StopSignal,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider::default()),
            id_generator: Arc::new(RealIdGenerator),
            registry: Arc::new(NodeExecutorRegistry::with_builtins()),
            config: EngineConfig::default(),
            execution: ExecutionContext::default(),
            stop_signal: StopSignal::new(),
        }
    }
}

impl RuntimeContext {
    pub fn with_registry(mut self, registry: Arc<NodeExecutorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    /// The run-wide limit a run has broken after `steps` node launches,
    /// or `None` while it is still within budget.
    pub fn exceeded_limit(&self, steps: usize, start_at_millis: i64) -> Option<WorkflowError> {
        if self.stop_signal.is_triggered() {
            return Some(WorkflowError::Aborted("stop requested".to_string()));
        }
        if steps > self.config.max_execution_steps {
            return Some(WorkflowError::MaxStepsExceeded(self.config.max_execution_steps));
        }
        let max_time = self.config.max_execution_time_secs;
        if self.time_provider.elapsed_secs(start_at_millis) > max_time {
            return Some(WorkflowError::ExecutionTimeout(max_time));
        }
        None
    }
}

pub trait TimeProvider: Send + Sync {
    fn now_millis(&self) -> i64;

    fn elapsed_secs(&self, since_millis: i64) -> u64 {
        let now = self.now_millis();
        if now >= since_millis {
            ((now - since_millis) / 1000) as u64
        } else {
            0
        }
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

#[derive(Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Default)]
pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

/// Clock that only moves when told to.
pub struct FakeTimeProvider {
    millis: AtomicI64,
}

impl FakeTimeProvider {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

pub struct FakeIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}
