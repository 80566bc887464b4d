//! The future-like handle returned by `invoke`

use crate::process::{ProcessOutcome, ProcessState};
use bureau_types::{Failure, ProcessId};
use std::sync::Arc;
use std::time::Duration;

/// Observes one invoked process: completion, the captured failure, and an
/// optional completion callback
#[derive(Clone)]
pub struct ProcessHandle {
    process: Arc<ProcessState>,
}

impl ProcessHandle {
    pub(crate) fn new(process: Arc<ProcessState>) -> Self {
        Self { process }
    }

    pub fn id(&self) -> ProcessId {
        self.process.id()
    }

    /// Completion is monotonic: once true, it stays true
    pub fn is_complete(&self) -> bool {
        self.process.is_complete()
    }

    /// Block until the process completes or the timeout expires; true if
    /// complete
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.process.wait(timeout)
    }

    /// The failure that reached the top-level handler without being
    /// otherwise handled, if any
    pub fn failure(&self) -> Option<Failure> {
        self.process.failure()
    }

    /// Register a completion callback; fires exactly once, immediately if
    /// the process already completed
    pub fn on_completion(&self, callback: impl FnOnce(ProcessOutcome) + Send + 'static) {
        self.process.add_listener(Box::new(callback));
    }
}
