//! Governance: cross-cutting enforce/disregard lifecycle over managed objects
//!
//! A governance binding moves through inactive → active → {enforced |
//! disregarded} → inactive, per thread. Activation is lazy: the first time
//! a governed object is used within a thread, an instance is created from
//! the registered source and each governed object's extension is
//! registered with it. The terminal action is chosen by the job node that
//! triggers deactivation — never by the governance instance itself.

use crate::object::ObjectInstance;
use std::collections::HashSet;
use std::sync::Arc;

/// One activation's worth of cross-cutting enforcement state
pub trait Governance: Send + Sync {
    /// Register one resource instance under this activation
    fn govern(&self, extension: ObjectInstance) -> Result<(), bureau_types::Failure>;

    /// Commit: invoked once all governed state for the activation is
    /// consistent
    fn enforce(&self) -> Result<(), bureau_types::Failure>;

    /// Rollback: discard accumulated state without side effects. The
    /// default is the legal no-op for governance types that define no
    /// disregard behavior.
    fn disregard(&self) -> Result<(), bureau_types::Failure> {
        Ok(())
    }
}

/// Creates one [`Governance`] instance per thread activation
pub trait GovernanceSource: Send + Sync {
    fn create(&self) -> Arc<dyn Governance>;
}

/// Which terminal action closes an activation. Fixed by the job node that
/// triggers deactivation, not by the governance instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeactivationStrategy {
    /// Commit on close
    Enforce,
    /// Rollback on close
    Disregard,
}

/// An active governance binding within one thread
pub(crate) struct GovernanceActivation {
    governance: Arc<dyn Governance>,
    /// Containers whose extensions are already registered
    governed: HashSet<u64>,
}

impl GovernanceActivation {
    pub(crate) fn new(governance: Arc<dyn Governance>) -> Self {
        Self {
            governance,
            governed: HashSet::new(),
        }
    }

    /// Mark a container as governed; true if it was not yet registered
    pub(crate) fn first_use(&mut self, container_id: u64) -> bool {
        self.governed.insert(container_id)
    }

    pub(crate) fn governance(&self) -> Arc<dyn Governance> {
        Arc::clone(&self.governance)
    }

    /// Apply the terminal action for this activation
    pub(crate) fn close(self, strategy: DeactivationStrategy) -> Result<(), bureau_types::Failure> {
        match strategy {
            DeactivationStrategy::Enforce => self.governance.enforce(),
            DeactivationStrategy::Disregard => self.governance.disregard(),
        }
    }
}
