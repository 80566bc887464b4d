//! Flows: ordered runs of job nodes sharing a completion count
//!
//! A flow is complete exactly when its active job node count reaches zero,
//! and completion is monotonic. Advancing a chain activates the successor
//! before retiring the current node, so the count never falsely touches
//! zero mid-chain. Completion counting is one critical section per level:
//! the flow mutates its own count and detects "last node retired" in a
//! single lock, then notifies the owning thread outside it.

use crate::job::JobNode;
use crate::thread::ThreadState;
use std::sync::{Arc, Mutex};

struct FlowInner {
    active: usize,
    completed: bool,
    /// Job nodes joined on this flow's completion
    waiters: Vec<Arc<JobNode>>,
}

pub(crate) struct Flow {
    thread: Arc<ThreadState>,
    inner: Mutex<FlowInner>,
}

impl Flow {
    /// Create a flow, registering it with its owning thread
    pub(crate) fn new(thread: Arc<ThreadState>) -> Arc<Self> {
        thread.flow_started();
        Arc::new(Self {
            thread,
            inner: Mutex::new(FlowInner {
                active: 0,
                completed: false,
                waiters: Vec::new(),
            }),
        })
    }

    pub(crate) fn thread(&self) -> &Arc<ThreadState> {
        &self.thread
    }

    pub(crate) fn job_activated(&self) {
        let mut inner = self.inner.lock().expect("flow lock poisoned");
        debug_assert!(!inner.completed, "job activated on a completed flow");
        inner.active += 1;
    }

    /// Retire one job node. If it was the last, the flow completes: joined
    /// waiters are woken and the owning thread notified, both outside the
    /// flow's critical section.
    pub(crate) fn job_retired(&self) {
        let (completed_now, waiters) = {
            let mut inner = self.inner.lock().expect("flow lock poisoned");
            debug_assert!(inner.active > 0, "retire without an active job");
            inner.active = inner.active.saturating_sub(1);
            if inner.active == 0 && !inner.completed {
                inner.completed = true;
                (true, std::mem::take(&mut inner.waiters))
            } else {
                (false, Vec::new())
            }
        };
        if completed_now {
            for waiter in waiters {
                waiter.claim_and_reactivate(None);
            }
            self.thread.flow_finished();
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.inner.lock().expect("flow lock poisoned").completed
    }

    /// Complete a flow that never had a node activated — an instigation
    /// whose instigating body failed before the flow could be scheduled
    pub(crate) fn abandon(&self) {
        let (completed_now, waiters) = {
            let mut inner = self.inner.lock().expect("flow lock poisoned");
            if inner.active == 0 && !inner.completed {
                inner.completed = true;
                (true, std::mem::take(&mut inner.waiters))
            } else {
                (false, Vec::new())
            }
        };
        if completed_now {
            for waiter in waiters {
                waiter.claim_and_reactivate(None);
            }
            self.thread.flow_finished();
        }
    }

    /// Register a joined waiter. Returns false if the flow is already
    /// complete — the caller has nothing to wait for.
    pub(crate) fn add_join_waiter(&self, job: Arc<JobNode>) -> bool {
        let mut inner = self.inner.lock().expect("flow lock poisoned");
        if inner.completed {
            return false;
        }
        if !inner.waiters.iter().any(|waiter| waiter.id() == job.id()) {
            inner.waiters.push(job);
        }
        true
    }
}

/// A joinable reference to a parallel-instigated flow
pub struct FlowHandle {
    flow: Arc<Flow>,
}

impl FlowHandle {
    pub(crate) fn new(flow: Arc<Flow>) -> Self {
        Self { flow }
    }

    pub(crate) fn into_flow(self) -> Arc<Flow> {
        self.flow
    }

    pub fn is_complete(&self) -> bool {
        self.flow.is_complete()
    }
}
