//! ProcessState: a top-level unit of work and its resource/thread graph
//!
//! A process is complete exactly when it has no active threads, and
//! completion is monotonic. On completion its listeners are notified and
//! its process-scoped managed objects released, after which the process is
//! deregistered from the kernel.

use crate::object::{ObjectContainer, ObjectSource};
use crate::office::OfficeRuntime;
use crate::runtime::KernelCore;
use bureau_types::{Failure, ObjectIndex, ProcessId};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// What a completion listener observes
#[derive(Clone, Debug)]
pub struct ProcessOutcome {
    pub process: ProcessId,
    /// The failure captured at the top-level handler, if one reached it
    pub failure: Option<Failure>,
}

type CompletionListener = Box<dyn FnOnce(ProcessOutcome) + Send>;

struct ProcessInner {
    active_threads: usize,
    completed: bool,
    /// Forced completion: pending work is cancelled instead of run
    forced: bool,
    failure: Option<Failure>,
    listeners: Vec<CompletionListener>,
    objects: Vec<Option<Arc<ObjectContainer>>>,
}

pub(crate) struct ProcessState {
    id: ProcessId,
    core: Arc<KernelCore>,
    /// Set for processes a managed object source invoked on its own
    /// behalf; failures route through the source's escalation handler
    source_handler: Option<Arc<dyn ObjectSource>>,
    /// Serializes process-scoped container creation
    bind: Mutex<()>,
    inner: Mutex<ProcessInner>,
    completion: Condvar,
}

impl ProcessState {
    pub(crate) fn new(
        core: Arc<KernelCore>,
        office: Arc<OfficeRuntime>,
        source_handler: Option<Arc<dyn ObjectSource>>,
    ) -> Arc<Self> {
        let objects = office.model().objects.len();
        Arc::new(Self {
            id: ProcessId::generate(),
            core,
            source_handler,
            bind: Mutex::new(()),
            inner: Mutex::new(ProcessInner {
                active_threads: 0,
                completed: false,
                forced: false,
                failure: None,
                listeners: Vec::new(),
                objects: vec![None; objects],
            }),
            completion: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> ProcessId {
        self.id
    }

    pub(crate) fn source_handler(&self) -> Option<&Arc<dyn ObjectSource>> {
        self.source_handler.as_ref()
    }

    pub(crate) fn thread_started(&self) {
        let mut inner = self.inner.lock().expect("process lock poisoned");
        debug_assert!(!inner.completed, "thread started on a completed process");
        inner.active_threads += 1;
    }

    /// One thread completed. If it was the last, the process completes:
    /// listeners fire, containers release, and the kernel deregisters the
    /// process — all outside the critical section.
    pub(crate) fn thread_finished(&self) {
        let completion = {
            let mut inner = self.inner.lock().expect("process lock poisoned");
            debug_assert!(inner.active_threads > 0, "thread finished without active threads");
            inner.active_threads = inner.active_threads.saturating_sub(1);
            if inner.active_threads == 0 && !inner.completed {
                inner.completed = true;
                let listeners = std::mem::take(&mut inner.listeners);
                let containers: Vec<Arc<ObjectContainer>> = inner
                    .objects
                    .iter_mut()
                    .filter_map(Option::take)
                    .collect();
                Some((listeners, containers, inner.failure.clone()))
            } else {
                None
            }
        };
        let Some((listeners, containers, failure)) = completion else {
            return;
        };
        self.completion.notify_all();
        for container in containers {
            container.release();
        }
        let outcome = ProcessOutcome {
            process: self.id,
            failure,
        };
        for listener in listeners {
            listener(outcome.clone());
        }
        tracing::debug!(process = %self.id, "process complete");
        self.core.deregister_process(self.id);
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.inner.lock().expect("process lock poisoned").completed
    }

    /// Forced completion never un-completes anything: it marks pending
    /// work cancelled so the completion count drains naturally.
    pub(crate) fn force_cancel(&self) -> bool {
        let mut inner = self.inner.lock().expect("process lock poisoned");
        if inner.completed || inner.forced {
            return false;
        }
        inner.forced = true;
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.lock().expect("process lock poisoned").forced
    }

    /// Capture the failure observed by the completion handle. The first
    /// failure to reach the top-level handler wins.
    pub(crate) fn record_failure(&self, failure: Failure) {
        let mut inner = self.inner.lock().expect("process lock poisoned");
        if inner.failure.is_none() {
            inner.failure = Some(failure);
        }
    }

    pub(crate) fn failure(&self) -> Option<Failure> {
        self.inner.lock().expect("process lock poisoned").failure.clone()
    }

    /// Register a completion listener; fires immediately on the
    /// registering thread if the process already completed.
    pub(crate) fn add_listener(&self, listener: CompletionListener) {
        let immediate = {
            let mut inner = self.inner.lock().expect("process lock poisoned");
            if inner.completed {
                Some((
                    listener,
                    ProcessOutcome {
                        process: self.id,
                        failure: inner.failure.clone(),
                    },
                ))
            } else {
                inner.listeners.push(listener);
                None
            }
        };
        if let Some((listener, outcome)) = immediate {
            listener(outcome);
        }
    }

    /// Block until completion or the timeout expires; true if complete
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut inner = self.inner.lock().expect("process lock poisoned");
        while !inner.completed {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self
                        .completion
                        .wait_timeout(inner, deadline - now)
                        .expect("process lock poisoned");
                    inner = guard;
                }
                None => {
                    inner = self
                        .completion
                        .wait(inner)
                        .expect("process lock poisoned");
                }
            }
        }
        true
    }

    /// Get or create the process-scoped container at the given index
    pub(crate) fn get_or_create_object(
        &self,
        index: ObjectIndex,
        create: impl FnOnce() -> Arc<ObjectContainer>,
    ) -> Arc<ObjectContainer> {
        let _bind = self.bind.lock().expect("process bind lock poisoned");
        {
            let inner = self.inner.lock().expect("process lock poisoned");
            if let Some(container) = &inner.objects[index.0] {
                return Arc::clone(container);
            }
        }
        let container = create();
        let mut inner = self.inner.lock().expect("process lock poisoned");
        inner.objects[index.0] = Some(Arc::clone(&container));
        container
    }
}
