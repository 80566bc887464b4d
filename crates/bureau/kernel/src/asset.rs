//! Parked-job bookkeeping for waits that must not block a team thread
//!
//! A job node waiting on an unready asset — a sourcing managed object, an
//! in-flight asynchronous operation, a joined flow — is parked here and its
//! team thread released. Wake-ups are signal-driven: whoever makes the
//! asset ready claims the parked entry and reassigns the job to its team.
//! The monitor sweep only drives deadline expiry.
//!
//! Claiming is the exactly-once point: an entry removed by one waker is
//! gone for every other waker, so a job parked once is woken once no
//! matter how many assets signal.

use crate::job::JobNode;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct ParkedJob {
    job: Arc<JobNode>,
    deadline: Option<Instant>,
    /// What the job is waiting on, for the timeout failure detail
    waiting_on: String,
}

struct MonitorInner {
    parked: HashMap<u64, ParkedJob>,
    open: bool,
}

pub(crate) struct AssetMonitor {
    inner: Mutex<MonitorInner>,
    sweep: Condvar,
}

impl AssetMonitor {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                parked: HashMap::new(),
                open: true,
            }),
            sweep: Condvar::new(),
        }
    }

    /// Register a parked job. The job must be claimed before it is
    /// reassigned to its team.
    pub(crate) fn park(
        &self,
        job: Arc<JobNode>,
        deadline: Option<Instant>,
        waiting_on: impl Into<String>,
    ) {
        let mut inner = self.inner.lock().expect("asset monitor lock poisoned");
        inner.parked.insert(
            job.id(),
            ParkedJob {
                job,
                deadline,
                waiting_on: waiting_on.into(),
            },
        );
    }

    /// Claim a parked job for waking. Returns `None` if another waker got
    /// there first (or the job was never parked).
    pub(crate) fn claim(&self, job_id: u64) -> Option<Arc<JobNode>> {
        let mut inner = self.inner.lock().expect("asset monitor lock poisoned");
        inner.parked.remove(&job_id).map(|parked| parked.job)
    }

    /// Remove and return every entry whose deadline has passed
    fn take_expired(&self, now: Instant) -> Vec<(Arc<JobNode>, String)> {
        let mut inner = self.inner.lock().expect("asset monitor lock poisoned");
        let due: Vec<u64> = inner
            .parked
            .iter()
            .filter(|(_, parked)| parked.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(id, _)| *id)
            .collect();
        due.into_iter()
            .filter_map(|id| inner.parked.remove(&id))
            .map(|parked| (parked.job, parked.waiting_on))
            .collect()
    }

    /// Remove and return every parked job belonging to the given process
    pub(crate) fn drain_process(
        &self,
        process: bureau_types::ProcessId,
    ) -> Vec<Arc<JobNode>> {
        let mut inner = self.inner.lock().expect("asset monitor lock poisoned");
        let matching: Vec<u64> = inner
            .parked
            .iter()
            .filter(|(_, parked)| parked.job.process_id() == process)
            .map(|(id, _)| *id)
            .collect();
        matching
            .into_iter()
            .filter_map(|id| inner.parked.remove(&id))
            .map(|parked| parked.job)
            .collect()
    }

    /// Deadline sweep loop, run on the kernel's monitor thread. Executes no
    /// job bodies: expired jobs are handed back to their teams with a
    /// timeout failure.
    pub(crate) fn run(&self, interval: Duration) {
        let mut inner = self.inner.lock().expect("asset monitor lock poisoned");
        while inner.open {
            let (guard, _timed_out) = self
                .sweep
                .wait_timeout(inner, interval)
                .expect("asset monitor lock poisoned");
            inner = guard;
            if !inner.open {
                break;
            }
            drop(inner);
            for (job, waiting_on) in self.take_expired(Instant::now()) {
                tracing::debug!(job = job.id(), %waiting_on, "bounded wait expired");
                job.reactivate(Some(bureau_types::Failure::timeout(format!(
                    "wait on {waiting_on} expired"
                ))));
            }
            inner = self.inner.lock().expect("asset monitor lock poisoned");
        }
    }

    /// Arm the sweep loop; called when the kernel opens (a closed kernel
    /// may be reopened)
    pub(crate) fn startup(&self) {
        self.inner.lock().expect("asset monitor lock poisoned").open = true;
    }

    /// Stop the sweep loop. Parked entries are left in place for the
    /// closer to drain per process.
    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("asset monitor lock poisoned");
        inner.open = false;
        self.sweep.notify_all();
    }
}
