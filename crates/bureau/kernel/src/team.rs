//! Teams: pluggable worker pools executing assigned job nodes
//!
//! The kernel holds no threads of its own — every job node body runs on a
//! thread owned by some team. The contract is deliberately loose: an
//! assignment must eventually run exactly once unless the kernel cancelled
//! it first, and the kernel works whether assignment is synchronous or
//! deferred.

use crate::job::JobNode;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// A worker pool that executes assigned job nodes on its own threads
pub trait Team: Send + Sync {
    /// Accept one assignment. The team must eventually call
    /// [`Assignment::run`] exactly once; a cancelled assignment retires
    /// itself without executing user code.
    fn assign(&self, assignment: Assignment);

    /// Start any worker threads. Called once when the kernel opens.
    fn open(&self) {}

    /// Stop accepting work and release worker threads. Called once when
    /// the kernel closes.
    fn close(&self) {}
}

pub(crate) enum AssignmentTask {
    Job(Arc<JobNode>),
    #[cfg(test)]
    Probe(Box<dyn FnOnce() + Send>),
}

/// One unit of team work: a job node due to run one slice
pub struct Assignment {
    task: AssignmentTask,
}

impl Assignment {
    pub(crate) fn new(job: Arc<JobNode>) -> Self {
        Self {
            task: AssignmentTask::Job(job),
        }
    }

    #[cfg(test)]
    pub(crate) fn probe(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            task: AssignmentTask::Probe(Box::new(f)),
        }
    }

    /// Whether the kernel cancelled this assignment (forced shutdown).
    /// Running a cancelled assignment is still correct — it retires
    /// without executing user code.
    pub fn is_cancelled(&self) -> bool {
        match &self.task {
            AssignmentTask::Job(job) => job.is_cancelled(),
            #[cfg(test)]
            AssignmentTask::Probe(_) => false,
        }
    }

    /// Execute the job node slice on the calling thread
    pub fn run(self) {
        match self.task {
            AssignmentTask::Job(job) => job.run_slice(),
            #[cfg(test)]
            AssignmentTask::Probe(f) => f(),
        }
    }
}

/// Executes assignments directly on the assigning thread
#[derive(Default)]
pub struct InlineTeam;

impl InlineTeam {
    pub fn new() -> Self {
        Self
    }
}

impl Team for InlineTeam {
    fn assign(&self, assignment: Assignment) {
        assignment.run();
    }
}

/// Spawns one dedicated thread per assignment
#[derive(Default)]
pub struct SpawnTeam;

impl SpawnTeam {
    pub fn new() -> Self {
        Self
    }
}

impl Team for SpawnTeam {
    fn assign(&self, assignment: Assignment) {
        let spawned = std::thread::Builder::new()
            .name("bureau-spawn-worker".into())
            .spawn(move || assignment.run());
        if let Err(error) = spawned {
            tracing::error!(%error, "failed to spawn worker thread, running inline");
        }
    }
}

/// A fixed pool of worker threads over an unbounded queue
pub struct PoolTeam {
    sender: Mutex<Option<Sender<Assignment>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolTeam {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = channel::<Assignment>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            let spawned = std::thread::Builder::new()
                .name(format!("bureau-pool-worker-{index}"))
                .spawn(move || Self::worker_loop(receiver));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(error) => tracing::error!(%error, "failed to spawn pool worker"),
            }
        }
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    fn worker_loop(receiver: Arc<Mutex<Receiver<Assignment>>>) {
        loop {
            let assignment = {
                let guard = match receiver.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                guard.recv()
            };
            match assignment {
                Ok(assignment) => assignment.run(),
                // Sender dropped: the pool is closing
                Err(_) => return,
            }
        }
    }
}

impl Team for PoolTeam {
    fn assign(&self, assignment: Assignment) {
        let guard = self.sender.lock().expect("pool sender lock poisoned");
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(assignment).is_err() {
                    tracing::warn!("assignment dropped: pool workers already stopped");
                }
            }
            None => tracing::warn!("assignment dropped: pool team is closed"),
        }
    }

    fn close(&self) {
        // Dropping the sender disconnects the queue; workers drain what is
        // left and exit.
        self.sender
            .lock()
            .expect("pool sender lock poisoned")
            .take();
        let workers = std::mem::take(
            &mut *self.workers.lock().expect("pool workers lock poisoned"),
        );
        for worker in workers {
            if worker.join().is_err() {
                tracing::warn!("pool worker exited with a panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_on_caller_thread() {
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        InlineTeam::new().assign(Assignment::probe(move || {
            tx.send(std::thread::current().id()).unwrap();
        }));
        assert_eq!(rx.recv().unwrap(), caller);
    }

    #[test]
    fn test_spawn_runs_on_other_thread() {
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        SpawnTeam::new().assign(Assignment::probe(move || {
            tx.send(std::thread::current().id()).unwrap();
        }));
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_pool_runs_every_assignment_once() {
        let pool = PoolTeam::new(3);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.assign(Assignment::probe(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            }));
        }
        for _ in 0..20 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        pool.close();
    }

    #[test]
    fn test_pool_close_drains_queue() {
        let pool = PoolTeam::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.assign(Assignment::probe(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.close();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_closed_pool_drops_assignment() {
        let pool = PoolTeam::new(1);
        pool.close();
        // Must not deadlock or panic
        pool.assign(Assignment::probe(|| {}));
    }
}
