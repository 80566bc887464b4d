//! Administration: pre/post duties around a unit of work
//!
//! A duty is a side-effecting interceptor, not a data-transforming stage —
//! nothing it returns propagates to the next node. Duty metadata is
//! compiled independently of any one thread's governance layout, so
//! governance control goes through the duty's local-to-thread index map.

use crate::governance::DeactivationStrategy;
use crate::object::{ContainerView, ObjectContainer, ObjectHandle};
use bureau_types::{DutyMetadata, DutyName, Failure, GovernanceIndex};
use std::sync::Arc;

/// Provides duty bodies, keyed by the duty discriminator
pub trait Administration: Send + Sync {
    fn administer(&self, duty: &DutyName, ctx: &mut DutyContext<'_>) -> Result<(), Failure>;
}

/// A governance action requested by a duty, applied as a governance job
/// node spliced after the duty in its chain
pub(crate) struct GovernanceRequest {
    pub(crate) index: GovernanceIndex,
    pub(crate) strategy: DeactivationStrategy,
}

/// Execution context of a duty job node
pub struct DutyContext<'a> {
    pub(crate) objects: &'a [Arc<ObjectContainer>],
    pub(crate) view: ContainerView,
    pub(crate) duty: &'a DutyMetadata,
    pub(crate) requests: Vec<GovernanceRequest>,
}

impl<'a> DutyContext<'a> {
    /// The administered unit's managed object at the given dependency
    /// position, through this duty's container view
    pub fn object(&self, position: usize) -> Result<ObjectHandle, Failure> {
        let container = self.objects.get(position).ok_or_else(|| {
            Failure::resource(format!(
                "duty {} has no object at position {position}",
                self.duty.duty
            ))
        })?;
        Ok(ObjectHandle::new(Arc::clone(container), self.view))
    }

    /// Commit the governance at the duty-local index
    pub fn enforce(&mut self, local: usize) -> Result<(), Failure> {
        self.request(local, DeactivationStrategy::Enforce)
    }

    /// Roll back the governance at the duty-local index
    pub fn disregard(&mut self, local: usize) -> Result<(), Failure> {
        self.request(local, DeactivationStrategy::Disregard)
    }

    fn request(&mut self, local: usize, strategy: DeactivationStrategy) -> Result<(), Failure> {
        let index = self
            .duty
            .thread_index(GovernanceIndex(local))
            .ok_or_else(|| {
                Failure::resource(format!(
                    "duty {} has no governance mapping for local index {local}",
                    self.duty.duty
                ))
            })?;
        self.requests.push(GovernanceRequest { index, strategy });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bureau_types::DutyMetadata;

    #[test]
    fn test_governance_requests_translate_local_indices() {
        let duty = DutyMetadata::new("audit", "record").with_governance(0, 3);
        let mut ctx = DutyContext {
            objects: &[],
            view: ContainerView::Proxied,
            duty: &duty,
            requests: Vec::new(),
        };

        ctx.enforce(0).unwrap();
        assert_eq!(ctx.requests.len(), 1);
        assert_eq!(ctx.requests[0].index, GovernanceIndex(3));
        assert_eq!(ctx.requests[0].strategy, DeactivationStrategy::Enforce);
    }

    #[test]
    fn test_unmapped_local_index_is_a_failure() {
        let duty = DutyMetadata::new("audit", "record");
        let mut ctx = DutyContext {
            objects: &[],
            view: ContainerView::Proxied,
            duty: &duty,
            requests: Vec::new(),
        };

        assert!(ctx.disregard(0).is_err());
        assert!(ctx.requests.is_empty());
    }

    #[test]
    fn test_missing_object_position_is_a_failure() {
        let duty = DutyMetadata::new("audit", "record");
        let ctx = DutyContext {
            objects: &[],
            view: ContainerView::Real,
            duty: &duty,
            requests: Vec::new(),
        };
        assert!(ctx.object(0).is_err());
    }
}
