//! The capability interface a schedulable unit implements, and the context
//! its body executes against
//!
//! A unit body never blocks: flow instigations and joins are recorded on
//! the context and applied by the kernel after the body returns, so a body
//! running on an inline team cannot recurse into another slice of its own
//! logical thread.

use crate::flow::{Flow, FlowHandle};
use crate::object::{ContainerView, ObjectContainer, ObjectHandle};
use crate::office::OfficeRuntime;
use crate::synchroniser::ThreadSynchroniser;
use crate::thread::ThreadState;
use bureau_types::{Failure, FlowStrategy, UnitMetadata};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An opaque parameter passed between units of work
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Build a payload from any shareable value
pub fn payload<T: Send + Sync + 'static>(value: T) -> Payload {
    Arc::new(value)
}

/// What a job node's body receives as its invocation input
#[derive(Clone)]
pub(crate) enum Param {
    None,
    Value(Payload),
    /// Handling flows receive the routed failure
    Failure(Failure),
}

/// A schedulable unit implementor
pub trait Work: Send + Sync {
    fn execute(&self, ctx: &mut WorkContext<'_>) -> Result<(), Failure>;
}

/// A flow instigation recorded during a body, applied after it returns
pub(crate) enum Instigation {
    Sequential {
        unit_index: usize,
        param: Param,
    },
    Parallel {
        flow: Arc<Flow>,
        unit_index: usize,
        param: Param,
    },
    Asynchronous {
        unit_index: usize,
        param: Param,
    },
}

/// A join recorded during a body; the node parks on it after the body
pub(crate) struct JoinRequest {
    pub(crate) flow: Arc<Flow>,
    pub(crate) deadline: Option<Instant>,
}

/// Deferred effects a body accumulates on its context
#[derive(Default)]
pub(crate) struct BodyEffects {
    pub(crate) instigations: Vec<Instigation>,
    pub(crate) joins: Vec<JoinRequest>,
}

/// Execution context of a unit-of-work job node
pub struct WorkContext<'a> {
    pub(crate) objects: &'a [Arc<ObjectContainer>],
    pub(crate) view: ContainerView,
    pub(crate) param: &'a Param,
    pub(crate) unit: &'a UnitMetadata,
    pub(crate) office: &'a Arc<OfficeRuntime>,
    pub(crate) thread: &'a Arc<ThreadState>,
    pub(crate) effects: BodyEffects,
}

impl<'a> WorkContext<'a> {
    /// The managed object at the given dependency position
    pub fn object(&self, position: usize) -> Result<ObjectHandle, Failure> {
        let container = self.objects.get(position).ok_or_else(|| {
            Failure::resource(format!(
                "{} has no object dependency at position {position}",
                self.unit.name
            ))
        })?;
        Ok(ObjectHandle::new(Arc::clone(container), self.view))
    }

    /// The invocation parameter, downcast to its concrete type
    pub fn parameter<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self.param {
            Param::Value(payload) => Arc::clone(payload).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// The routed failure, when this body runs as an escalation handling
    /// flow
    pub fn failure(&self) -> Option<&Failure> {
        match self.param {
            Param::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Instigate the flow at the given branch-table index.
    ///
    /// Returns a handle for parallel instigations; sequential and
    /// asynchronous instigations have nothing to join.
    pub fn instigate(
        &mut self,
        flow_index: usize,
        parameter: Option<Payload>,
        strategy: FlowStrategy,
    ) -> Result<Option<FlowHandle>, Failure> {
        let target = self.unit.flows.get(flow_index).ok_or_else(|| {
            Failure::resource(format!(
                "{} has no flow branch at index {flow_index}",
                self.unit.name
            ))
        })?;
        let unit_index = self.office.unit_index(target)?;
        let param = match parameter {
            Some(payload) => Param::Value(payload),
            None => Param::None,
        };
        match strategy {
            FlowStrategy::Sequential => {
                self.effects
                    .instigations
                    .push(Instigation::Sequential { unit_index, param });
                Ok(None)
            }
            FlowStrategy::Parallel => {
                // The flow is created (and counted) now so the body can
                // join it; its first node is activated after the body.
                let flow = Flow::new(Arc::clone(self.thread));
                self.effects.instigations.push(Instigation::Parallel {
                    flow: Arc::clone(&flow),
                    unit_index,
                    param,
                });
                Ok(Some(FlowHandle::new(flow)))
            }
            FlowStrategy::Asynchronous => {
                self.effects
                    .instigations
                    .push(Instigation::Asynchronous { unit_index, param });
                Ok(None)
            }
        }
    }

    /// Wait for an instigated flow to complete before advancing past this
    /// node. With a timeout, expiry wakes this node with a timeout failure
    /// that escalates normally.
    pub fn join(&mut self, handle: FlowHandle, timeout: Option<Duration>) {
        self.effects.joins.push(JoinRequest {
            flow: handle.into_flow(),
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        });
    }

    /// Register a synchroniser carrying thread-affine context across team
    /// hand-offs for the rest of this logical thread's life
    pub fn register_synchroniser(&self, synchroniser: Arc<dyn ThreadSynchroniser>) {
        self.thread.register_synchroniser(synchroniser);
    }
}
