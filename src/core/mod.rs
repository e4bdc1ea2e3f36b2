//! Execution core: variable pool, runtime state, events and the graph engine.

pub mod dispatcher;
pub mod event_bus;
pub mod runtime_context;
pub mod runtime_state;
pub mod stop_signal;
pub mod variable_pool;

pub use dispatcher::{EngineConfig, GraphEngine, GraphRunOutcome};
pub use event_bus::{EventEmitter, EventScope, GraphEngineEvent};
pub use runtime_context::{
    ExecutionContext, FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator,
    RealTimeProvider, RuntimeContext, TimeProvider,
};
pub use runtime_state::GraphRuntimeState;
pub use stop_signal::StopSignal;
pub use variable_pool::{Segment, Selector, VariablePool};
