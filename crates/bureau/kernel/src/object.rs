//! Managed object containers and their sourcing lifecycle
//!
//! A container owns exactly one resource instance per scope. Sourcing is
//! either immediate (the instance exists before `source()` returns) or a
//! callback supplied later from any thread — exactly once. Jobs never read
//! a container before it is fully sourced; they park and are woken when
//! the supplier signals readiness. A sourced resource may additionally
//! bracket long-running work with operation started/completed
//! notifications, which keep dependent jobs parked until the operation
//! finishes.

use crate::job::JobNode;
use crate::office::OfficeRuntime;
use crate::runtime::KernelCore;
use crate::work::Payload;
use bureau_types::{Failure, ObjectMetadata, SourcingMode, UnitName};
use std::any::Any;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

/// A sourced resource instance, shared with every job node bound to it
pub type ObjectInstance = Arc<dyn Any + Send + Sync>;

/// Supplies resource instances for one managed object binding
pub trait ObjectSource: Send + Sync {
    /// Begin sourcing one instance. Immediate sources supply before
    /// returning; callback sources keep the context and supply later,
    /// from any thread, exactly once.
    fn source(&self, ctx: SourcingContext) -> Result<(), Failure>;

    /// Take back a released instance. Only called for pooled bindings.
    fn recycle(&self, _instance: ObjectInstance) {}

    /// Handle a failure raised by a flow this source invoked. `None`
    /// declines, routing the failure onward; `Some(Err(_))` escalates the
    /// handler's own failure to the top-level handler, never back here.
    fn handle_escalation(&self, _failure: &Failure) -> Option<Result<(), Failure>> {
        None
    }
}

/// Which view of a container a job node holds
///
/// Every node of an administered chain except the last sees the proxied
/// view; container finalization is only triggered from the real view, so
/// partial administration stays invisible until the whole phase completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerView {
    Real,
    Proxied,
}

#[derive(Debug)]
enum ContainerState {
    Sourcing,
    Ready,
    Failed(Failure),
    Released,
}

pub(crate) enum ContainerPoll {
    Ready,
    NotReady,
    Failed(Failure),
}

struct ContainerInner {
    state: ContainerState,
    instance: Option<ObjectInstance>,
    /// Asynchronous operations currently in flight
    in_flight: usize,
    waiters: Vec<Arc<JobNode>>,
}

/// Owns one stateful resource instance for the duration of its scope
pub(crate) struct ObjectContainer {
    id: u64,
    metadata: ObjectMetadata,
    source: Arc<dyn ObjectSource>,
    created_at: Instant,
    inner: Mutex<ContainerInner>,
}

impl ObjectContainer {
    pub(crate) fn new(id: u64, metadata: ObjectMetadata, source: Arc<dyn ObjectSource>) -> Arc<Self> {
        Arc::new(Self {
            id,
            metadata,
            source,
            created_at: Instant::now(),
            inner: Mutex::new(ContainerInner {
                state: ContainerState::Sourcing,
                instance: None,
                in_flight: 0,
                waiters: Vec::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    /// Kick off sourcing. Must be called exactly once, after construction.
    pub(crate) fn start_sourcing(
        this: &Arc<Self>,
        dependencies: Vec<Arc<ObjectContainer>>,
        office: Arc<OfficeRuntime>,
        core: Arc<KernelCore>,
    ) {
        let ctx = SourcingContext {
            container: Arc::clone(this),
            dependencies,
            office,
            core,
        };
        let mode = this.metadata.sourcing;
        if let Err(failure) = this.source.source(ctx) {
            this.fail(failure);
            return;
        }
        if mode == SourcingMode::Immediate {
            let supplied = {
                let inner = this.inner.lock().expect("container lock poisoned");
                !matches!(inner.state, ContainerState::Sourcing)
            };
            if !supplied {
                this.fail(Failure::resource(format!(
                    "{} declared immediate sourcing but supplied no instance",
                    this.metadata.name
                )));
            }
        }
    }

    /// Supply the sourced instance. Exactly one notification is honored;
    /// later notifications are rejected and logged.
    pub(crate) fn supply(&self, instance: ObjectInstance) {
        let waiters = {
            let mut inner = self.inner.lock().expect("container lock poisoned");
            match inner.state {
                ContainerState::Sourcing => {
                    inner.state = ContainerState::Ready;
                    inner.instance = Some(instance);
                    std::mem::take(&mut inner.waiters)
                }
                _ => {
                    tracing::warn!(
                        object = %self.metadata.name,
                        "sourcing notified more than once; extra notification ignored"
                    );
                    return;
                }
            }
        };
        self.wake(waiters, None);
    }

    /// Record a sourcing failure and fail every waiting job
    pub(crate) fn fail(&self, failure: Failure) {
        let waiters = {
            let mut inner = self.inner.lock().expect("container lock poisoned");
            match inner.state {
                ContainerState::Sourcing => {
                    inner.state = ContainerState::Failed(failure.clone());
                    std::mem::take(&mut inner.waiters)
                }
                _ => {
                    tracing::warn!(
                        object = %self.metadata.name,
                        "sourcing failure after terminal state ignored"
                    );
                    return;
                }
            }
        };
        self.wake(waiters, Some(failure));
    }

    pub(crate) fn poll_ready(&self) -> ContainerPoll {
        let inner = self.inner.lock().expect("container lock poisoned");
        match &inner.state {
            ContainerState::Ready if inner.in_flight == 0 => ContainerPoll::Ready,
            ContainerState::Ready | ContainerState::Sourcing => ContainerPoll::NotReady,
            ContainerState::Failed(failure) => ContainerPoll::Failed(failure.clone()),
            ContainerState::Released => ContainerPoll::Failed(Failure::resource(format!(
                "{} read after release",
                self.metadata.name
            ))),
        }
    }

    /// Register a job to wake when this container becomes ready
    pub(crate) fn add_waiter(&self, job: Arc<JobNode>) {
        let mut inner = self.inner.lock().expect("container lock poisoned");
        if !inner.waiters.iter().any(|waiter| waiter.id() == job.id()) {
            inner.waiters.push(job);
        }
    }

    /// An asynchronous operation began; dependent jobs stay parked
    pub(crate) fn operation_started(&self) {
        let mut inner = self.inner.lock().expect("container lock poisoned");
        inner.in_flight += 1;
    }

    /// An asynchronous operation finished; wake the currently bound
    /// waiters once no operations remain in flight
    pub(crate) fn operation_completed(&self) {
        let waiters = {
            let mut inner = self.inner.lock().expect("container lock poisoned");
            if inner.in_flight == 0 {
                tracing::warn!(
                    object = %self.metadata.name,
                    "operation completion without a started operation ignored"
                );
                return;
            }
            inner.in_flight -= 1;
            if inner.in_flight == 0 {
                std::mem::take(&mut inner.waiters)
            } else {
                Vec::new()
            }
        };
        self.wake(waiters, None);
    }

    pub(crate) fn instance(&self) -> Option<ObjectInstance> {
        self.inner
            .lock()
            .expect("container lock poisoned")
            .instance
            .clone()
    }

    /// Absolute deadline for callback sourcing, if the metadata bounds it
    pub(crate) fn sourcing_deadline(&self) -> Option<Instant> {
        self.metadata
            .timeout_ms
            .map(|ms| self.created_at + std::time::Duration::from_millis(ms))
    }

    /// The deadline a parked job should carry: sourcing is bounded, an
    /// in-flight operation wait is not
    pub(crate) fn pending_deadline(&self) -> Option<Instant> {
        let sourcing = matches!(
            self.inner.lock().expect("container lock poisoned").state,
            ContainerState::Sourcing
        );
        if sourcing {
            self.sourcing_deadline()
        } else {
            None
        }
    }

    /// Release the container at the end of its scope, recycling pooled
    /// instances through the source
    pub(crate) fn release(&self) {
        let instance = {
            let mut inner = self.inner.lock().expect("container lock poisoned");
            if !inner.waiters.is_empty() {
                tracing::warn!(
                    object = %self.metadata.name,
                    waiters = inner.waiters.len(),
                    "container released while jobs were still waiting"
                );
            }
            inner.state = ContainerState::Released;
            inner.waiters.clear();
            inner.instance.take()
        };
        if self.metadata.pooled {
            if let Some(instance) = instance {
                self.source.recycle(instance);
            }
        }
    }

    fn wake(&self, waiters: Vec<Arc<JobNode>>, failure: Option<Failure>) {
        for job in waiters {
            job.claim_and_reactivate(failure.clone());
        }
    }
}

/// Handed to an [`ObjectSource`] to supply its instance and signal
/// operation progress
#[derive(Clone)]
pub struct SourcingContext {
    container: Arc<ObjectContainer>,
    dependencies: Vec<Arc<ObjectContainer>>,
    office: Arc<OfficeRuntime>,
    core: Arc<KernelCore>,
}

impl SourcingContext {
    /// Supply the sourced instance, waking every waiting job. Exactly one
    /// supply or failure is honored per container.
    pub fn supply<T: Send + Sync + 'static>(&self, instance: T) {
        self.container.supply(Arc::new(instance));
    }

    /// Supply an already-shared instance (pooled sources)
    pub fn supply_instance(&self, instance: ObjectInstance) {
        self.container.supply(instance);
    }

    /// Report that sourcing failed; waiting jobs escalate a resource
    /// failure
    pub fn fail(&self, failure: Failure) {
        self.container.fail(failure);
    }

    /// Obtain the handle a long-running resource uses to bracket its
    /// asynchronous operations
    pub fn async_context(&self) -> AsyncContext {
        AsyncContext {
            container: Arc::downgrade(&self.container),
        }
    }

    /// A dependency's instance. Dependencies are bound before this
    /// container, but a callback-sourced dependency may not be ready yet.
    pub fn dependency(&self, index: usize) -> Result<ObjectInstance, Failure> {
        let container = self.dependencies.get(index).ok_or_else(|| {
            Failure::resource(format!(
                "{} has no dependency at position {index}",
                self.container.metadata.name
            ))
        })?;
        container.instance().ok_or_else(|| {
            Failure::resource(format!(
                "dependency {} of {} is not ready",
                container.metadata.name, self.container.metadata.name
            ))
        })
    }

    /// Invoke a unit on the owning office as a new process. Failures of
    /// that process route through this source's `handle_escalation`.
    pub fn invoke(&self, unit: &UnitName, parameter: Option<Payload>) -> Result<(), Failure> {
        KernelCore::invoke_for_source(
            &self.core,
            &self.office,
            unit,
            parameter,
            Arc::clone(&self.container.source),
        )
        .map_err(|error| {
            Failure::resource(format!(
                "{} could not invoke {unit}: {error}",
                self.container.metadata.name
            ))
        })
    }
}

/// Signals operation start/completion for a long-running resource
#[derive(Clone)]
pub struct AsyncContext {
    container: Weak<ObjectContainer>,
}

impl AsyncContext {
    pub fn start(&self) {
        if let Some(container) = self.container.upgrade() {
            container.operation_started();
        }
    }

    pub fn complete(&self) {
        if let Some(container) = self.container.upgrade() {
            container.operation_completed();
        }
    }
}

/// A job node's view of one bound managed object
pub struct ObjectHandle {
    container: Arc<ObjectContainer>,
    view: ContainerView,
}

impl ObjectHandle {
    pub(crate) fn new(container: Arc<ObjectContainer>, view: ContainerView) -> Self {
        Self { container, view }
    }

    /// The sourced instance, downcast to its concrete type. The kernel
    /// only runs a job once every bound container is ready, so the only
    /// failure here is a type mismatch.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Failure> {
        let instance = self.container.instance().ok_or_else(|| {
            Failure::resource(format!("{} is not sourced", self.container.metadata.name))
        })?;
        instance.downcast::<T>().map_err(|_| {
            Failure::resource(format!(
                "{} does not hold a {}",
                self.container.metadata.name,
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn view(&self) -> ContainerView {
        self.view
    }

    pub fn name(&self) -> &bureau_types::ObjectName {
        &self.container.metadata.name
    }
}
