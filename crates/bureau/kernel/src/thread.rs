//! ThreadState: a logical thread of control within a process
//!
//! A logical thread owns thread-scoped managed objects, its active flows,
//! the per-thread governance activation set, and the registered
//! thread-local synchronisers. Job slices of one logical thread are
//! serialized: a flow's execution may hop between arbitrary team threads,
//! but no two team threads execute nodes of the same logical thread at
//! once, which is what makes suspend/resume pairing sound.

use crate::governance::{DeactivationStrategy, GovernanceActivation};
use crate::object::ObjectContainer;
use crate::office::OfficeRuntime;
use crate::process::ProcessState;
use crate::runtime::KernelCore;
use crate::synchroniser::ThreadSynchroniser;
use bureau_types::{Failure, GovernanceIndex, ObjectIndex};
use std::sync::{Arc, Mutex, MutexGuard};

struct ThreadInner {
    active_flows: usize,
    completed: bool,
    /// An escalation passed through this thread: remaining governance
    /// closes by rollback instead of commit
    poisoned: bool,
    objects: Vec<Option<Arc<ObjectContainer>>>,
    governance: Vec<Option<GovernanceActivation>>,
    synchronisers: Vec<Arc<dyn ThreadSynchroniser>>,
    /// Thread-affine context is currently captured by a suspend
    context_parked: bool,
}

pub(crate) struct ThreadState {
    process: Arc<ProcessState>,
    office: Arc<OfficeRuntime>,
    core: Arc<KernelCore>,
    /// Whether this thread runs an escalation handling flow; its failures
    /// route straight to the top-level handler
    escalation_handling: bool,
    /// Serializes job slices of this logical thread
    slice: Mutex<()>,
    /// Serializes thread-scoped container creation
    bind: Mutex<()>,
    inner: Mutex<ThreadInner>,
}

impl ThreadState {
    /// Create a thread and register it with its owning process
    pub(crate) fn spawn(
        process: Arc<ProcessState>,
        office: Arc<OfficeRuntime>,
        core: Arc<KernelCore>,
        escalation_handling: bool,
    ) -> Arc<Self> {
        process.thread_started();
        let objects = office.model().objects.len();
        let governance = office.model().governance.len();
        Arc::new(Self {
            process,
            office,
            core,
            escalation_handling,
            slice: Mutex::new(()),
            bind: Mutex::new(()),
            inner: Mutex::new(ThreadInner {
                active_flows: 0,
                completed: false,
                poisoned: false,
                objects: vec![None; objects],
                governance: std::iter::repeat_with(|| None).take(governance).collect(),
                synchronisers: Vec::new(),
                context_parked: false,
            }),
        })
    }

    pub(crate) fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub(crate) fn is_escalation_handling(&self) -> bool {
        self.escalation_handling
    }

    pub(crate) fn mark_poisoned(&self) {
        self.inner.lock().expect("thread lock poisoned").poisoned = true;
    }

    // ── Flow completion counting ─────────────────────────────────────

    pub(crate) fn flow_started(&self) {
        let mut inner = self.inner.lock().expect("thread lock poisoned");
        debug_assert!(!inner.completed, "flow started on a completed thread");
        inner.active_flows += 1;
    }

    /// One flow completed. If it was the last, the thread completes:
    /// remaining governance closes with the strategy of the triggering
    /// node (commit normally, rollback on an escalated teardown),
    /// thread-scoped containers release, and the process is notified.
    pub(crate) fn flow_finished(&self) {
        let completion = {
            let mut inner = self.inner.lock().expect("thread lock poisoned");
            debug_assert!(inner.active_flows > 0, "flow finished without active flows");
            inner.active_flows = inner.active_flows.saturating_sub(1);
            if inner.active_flows == 0 && !inner.completed {
                inner.completed = true;
                let activations: Vec<GovernanceActivation> = inner
                    .governance
                    .iter_mut()
                    .filter_map(Option::take)
                    .collect();
                let containers: Vec<Arc<ObjectContainer>> = inner
                    .objects
                    .iter_mut()
                    .filter_map(Option::take)
                    .collect();
                Some((inner.poisoned, activations, containers))
            } else {
                None
            }
        };
        let Some((poisoned, activations, containers)) = completion else {
            return;
        };
        let strategy = if poisoned {
            DeactivationStrategy::Disregard
        } else {
            DeactivationStrategy::Enforce
        };
        for activation in activations {
            if let Err(failure) = activation.close(strategy) {
                tracing::warn!(%failure, "governance close failed at thread completion");
                self.core.top_level(&self.process, failure);
            }
        }
        for container in containers {
            container.release();
        }
        self.process.thread_finished();
    }

    // ── Thread-scoped managed objects ────────────────────────────────

    /// Get or create the thread-scoped container at the given index. The
    /// bind lock serializes creation so a source is never run twice for
    /// one slot.
    pub(crate) fn get_or_create_object(
        &self,
        index: ObjectIndex,
        create: impl FnOnce() -> Arc<ObjectContainer>,
    ) -> Arc<ObjectContainer> {
        let _bind = self.bind.lock().expect("thread bind lock poisoned");
        {
            let inner = self.inner.lock().expect("thread lock poisoned");
            if let Some(container) = &inner.objects[index.0] {
                return Arc::clone(container);
            }
        }
        let container = create();
        let mut inner = self.inner.lock().expect("thread lock poisoned");
        inner.objects[index.0] = Some(Arc::clone(&container));
        container
    }

    // ── Governance ───────────────────────────────────────────────────

    /// Lazily activate the governance at the given index and register the
    /// container's extension with it, once per container per activation.
    pub(crate) fn govern_container(
        &self,
        index: GovernanceIndex,
        container: &Arc<ObjectContainer>,
    ) -> Result<(), Failure> {
        loop {
            {
                let mut inner = self.inner.lock().expect("thread lock poisoned");
                if let Some(activation) = inner.governance[index.0].as_mut() {
                    if !activation.first_use(container.id()) {
                        return Ok(());
                    }
                    let governance = activation.governance();
                    drop(inner);
                    let instance = container.instance().ok_or_else(|| {
                        Failure::resource(format!(
                            "{} governed before it was sourced",
                            container.metadata().name
                        ))
                    })?;
                    return governance.govern(instance);
                }
            }
            // First use within this thread: create the activation outside
            // the lock, losing gracefully if another slice raced us.
            let source = self.office.governance_source(index)?;
            let governance = source.create();
            let mut inner = self.inner.lock().expect("thread lock poisoned");
            if inner.governance[index.0].is_none() {
                inner.governance[index.0] = Some(GovernanceActivation::new(governance));
            }
        }
    }

    /// Close the activation at the given index with the strategy carried
    /// by the triggering job node. Enforce/disregard is only legal while
    /// active.
    pub(crate) fn deactivate_governance(
        &self,
        index: GovernanceIndex,
        strategy: DeactivationStrategy,
    ) -> Result<(), Failure> {
        let activation = {
            let mut inner = self.inner.lock().expect("thread lock poisoned");
            inner.governance[index.0].take()
        };
        match activation {
            Some(activation) => activation.close(strategy),
            None => Err(Failure::resource(format!(
                "governance {index} is not active on this thread"
            ))),
        }
    }

    // ── Synchronisers and slice bracketing ───────────────────────────

    pub(crate) fn register_synchroniser(&self, synchroniser: Arc<dyn ThreadSynchroniser>) {
        let mut inner = self.inner.lock().expect("thread lock poisoned");
        inner.synchronisers.push(synchroniser);
    }

    /// Begin one job slice on the calling team thread: serialize against
    /// other slices of this logical thread and restore any captured
    /// thread-affine context. The returned guard suspends the context
    /// again when dropped.
    pub(crate) fn begin_slice(&self) -> SliceGuard<'_> {
        let guard = self.slice.lock().expect("thread slice lock poisoned");
        let to_resume = {
            let mut inner = self.inner.lock().expect("thread lock poisoned");
            if inner.context_parked {
                inner.context_parked = false;
                inner.synchronisers.clone()
            } else {
                Vec::new()
            }
        };
        for synchroniser in &to_resume {
            synchroniser.resume();
        }
        SliceGuard {
            thread: self,
            _guard: guard,
        }
    }
}

/// Holds the logical thread for the duration of one job slice
pub(crate) struct SliceGuard<'a> {
    thread: &'a ThreadState,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for SliceGuard<'_> {
    fn drop(&mut self) {
        let to_suspend = {
            let mut inner = self
                .thread
                .inner
                .lock()
                .expect("thread lock poisoned");
            if inner.synchronisers.is_empty() {
                Vec::new()
            } else {
                inner.context_parked = true;
                inner.synchronisers.clone()
            }
        };
        for synchroniser in &to_suspend {
            synchroniser.suspend();
        }
    }
}
