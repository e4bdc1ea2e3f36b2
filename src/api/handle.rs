//! Handle to a launched workflow run.

use futures::stream::{self, Stream};
use tokio::sync::{mpsc, watch, Mutex};

use crate::core::event_bus::GraphEngineEvent;
use crate::core::stop_signal::StopSignal;
use crate::domain::execution::ExecutionStatus;

/// Handle to a running or completed workflow.
///
/// Events are pulled one at a time with [`next_event()`](Self::next_event)
/// (or consumed as a [`Stream`]); the final status is available through
/// [`wait()`](Self::wait) whether or not anyone reads the events.
pub struct WorkflowHandle {
    workflow_run_id: String,
    status_rx: watch::Receiver<ExecutionStatus>,
    events: Mutex<mpsc::UnboundedReceiver<GraphEngineEvent>>,
    stop_signal: StopSignal,
}

impl WorkflowHandle {
    pub(crate) fn new(
        workflow_run_id: String,
        status_rx: watch::Receiver<ExecutionStatus>,
        events: mpsc::UnboundedReceiver<GraphEngineEvent>,
        stop_signal: StopSignal,
    ) -> Self {
        Self {
            workflow_run_id,
            status_rx,
            events: Mutex::new(events),
            stop_signal,
        }
    }

    pub fn workflow_run_id(&self) -> &str {
        &self.workflow_run_id
    }

    /// Current execution status (non-blocking).
    pub fn status(&self) -> ExecutionStatus {
        self.status_rx.borrow().clone()
    }

    /// Next engine event, or `None` once the run has finished and every
    /// event was consumed.
    pub async fn next_event(&self) -> Option<GraphEngineEvent> {
        self.events.lock().await.recv().await
    }

    /// Consume the handle as a stream of engine events.
    pub fn into_event_stream(self) -> impl Stream<Item = GraphEngineEvent> {
        let rx = self.events.into_inner();
        stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        })
    }

    /// Block until the workflow reaches a terminal status.
    pub async fn wait(&self) -> ExecutionStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = rx.borrow().clone();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Ask every engine of the run to stop at its next step boundary.
    pub fn abort(&self) {
        self.stop_signal.trigger();
    }
}
