//! The compiled office graph
//!
//! An external compiler produces one `OfficeModel` per scheduling domain.
//! Units, objects, and governance bindings reference each other by index
//! into the model's tables; the kernel validates every reference before it
//! opens the office and treats the model as immutable afterwards.

use crate::{
    AdministratorName, DutyName, FailureMatch, GovernanceIndex, GovernanceName, ObjectIndex,
    ObjectName, OfficeName, TeamName, UnitName,
};
use serde::{Deserialize, Serialize};

/// Lifetime scope of a managed object instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectScope {
    /// One instance per process, shared by all its threads
    Process,
    /// One instance per logical thread
    Thread,
    /// One instance per unit-of-work invocation
    Unit,
}

impl ObjectScope {
    /// Width ordering: a narrower-scoped object may depend on a wider one,
    /// never the reverse
    pub fn width(self) -> u8 {
        match self {
            ObjectScope::Process => 2,
            ObjectScope::Thread => 1,
            ObjectScope::Unit => 0,
        }
    }
}

/// How a managed object source supplies its instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourcingMode {
    /// The instance is supplied before `source()` returns
    Immediate,
    /// The instance is supplied later, from any thread, exactly once
    Callback,
}

/// How an instigated flow relates to the invoking node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStrategy {
    /// Continues the invoking node's thread: the target chain runs before
    /// the invoking node's successor
    Sequential,
    /// A new flow on the same thread, running independently
    Parallel,
    /// A new process and thread entirely
    Asynchronous,
}

/// Maps a duty's local governance index into the thread-wide index space
///
/// Duty metadata is compiled independently of any one thread's governance
/// layout, so each duty carries its own translation table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceMapping {
    pub local: GovernanceIndex,
    pub thread: GovernanceIndex,
}

/// One configured pre- or post-duty of a unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyMetadata {
    /// The administrator providing the duty body
    pub administrator: AdministratorName,
    /// The duty discriminator passed to the administrator
    pub duty: DutyName,
    /// Local-to-thread governance index translation
    pub governance_map: Vec<GovernanceMapping>,
}

impl DutyMetadata {
    pub fn new(administrator: impl Into<String>, duty: impl Into<String>) -> Self {
        Self {
            administrator: AdministratorName::new(administrator),
            duty: DutyName::new(duty),
            governance_map: Vec::new(),
        }
    }

    pub fn with_governance(mut self, local: usize, thread: usize) -> Self {
        self.governance_map.push(GovernanceMapping {
            local: GovernanceIndex(local),
            thread: GovernanceIndex(thread),
        });
        self
    }

    /// Translate a duty-local governance index to the thread index space
    pub fn thread_index(&self, local: GovernanceIndex) -> Option<GovernanceIndex> {
        self.governance_map
            .iter()
            .find(|m| m.local == local)
            .map(|m| m.thread)
    }
}

/// One managed object source binding of an office
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub name: ObjectName,
    pub scope: ObjectScope,
    pub sourcing: SourcingMode,
    /// Object indices that must be bound before this one
    pub dependencies: Vec<ObjectIndex>,
    /// Whether released instances are recycled through the source
    pub pooled: bool,
    /// Governance that must be active while this object is in use
    pub governance: Vec<GovernanceIndex>,
    /// Bound on callback sourcing; expiry fails waiting jobs with a timeout
    pub timeout_ms: Option<u64>,
}

impl ObjectMetadata {
    pub fn new(name: impl Into<String>, scope: ObjectScope) -> Self {
        Self {
            name: ObjectName::new(name),
            scope,
            sourcing: SourcingMode::Immediate,
            dependencies: Vec::new(),
            pooled: false,
            governance: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn callback_sourced(mut self) -> Self {
        self.sourcing = SourcingMode::Callback;
        self
    }

    pub fn pooled(mut self) -> Self {
        self.pooled = true;
        self
    }

    pub fn with_dependency(mut self, index: usize) -> Self {
        self.dependencies.push(ObjectIndex(index));
        self
    }

    pub fn with_governance(mut self, index: usize) -> Self {
        self.governance.push(GovernanceIndex(index));
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// One governance binding of an office, activated per thread
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceMetadata {
    pub name: GovernanceName,
}

impl GovernanceMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: GovernanceName::new(name),
        }
    }
}

/// One schedulable unit of an office
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub name: UnitName,
    /// The team that executes this unit's job nodes
    pub team: TeamName,
    /// Managed objects that must be bound before execution
    pub dependencies: Vec<ObjectIndex>,
    /// Duties executed before the unit body, in order
    pub pre_duties: Vec<DutyMetadata>,
    /// Duties executed after the unit body, in order
    pub post_duties: Vec<DutyMetadata>,
    /// Sequential successor once this unit's chain completes
    pub next: Option<UnitName>,
    /// Branch table: flow targets the unit body may instigate by index
    pub flows: Vec<UnitName>,
}

impl UnitMetadata {
    pub fn new(name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            name: UnitName::new(name),
            team: TeamName::new(team),
            dependencies: Vec::new(),
            pre_duties: Vec::new(),
            post_duties: Vec::new(),
            next: None,
            flows: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, index: usize) -> Self {
        self.dependencies.push(ObjectIndex(index));
        self
    }

    pub fn with_pre_duty(mut self, duty: DutyMetadata) -> Self {
        self.pre_duties.push(duty);
        self
    }

    pub fn with_post_duty(mut self, duty: DutyMetadata) -> Self {
        self.post_duties.push(duty);
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(UnitName::new(next));
        self
    }

    pub fn with_flow(mut self, target: impl Into<String>) -> Self {
        self.flows.push(UnitName::new(target));
        self
    }

    pub fn has_duties(&self) -> bool {
        !self.pre_duties.is_empty() || !self.post_duties.is_empty()
    }
}

/// One entry of an office's ordered escalation table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEntry {
    /// What failures this entry handles
    pub matches: FailureMatch,
    /// The unit instigated as the handling flow
    pub handler: UnitName,
}

impl EscalationEntry {
    pub fn new(matches: FailureMatch, handler: impl Into<String>) -> Self {
        Self {
            matches,
            handler: UnitName::new(handler),
        }
    }
}

/// The compiled graph of one scheduling domain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeModel {
    pub name: OfficeName,
    pub units: Vec<UnitMetadata>,
    pub objects: Vec<ObjectMetadata>,
    pub governance: Vec<GovernanceMetadata>,
    /// Ordered escalation table; the top-level handler is the terminal
    /// fallback behind the last entry
    pub escalations: Vec<EscalationEntry>,
}

impl OfficeModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: OfficeName::new(name),
            units: Vec::new(),
            objects: Vec::new(),
            governance: Vec::new(),
            escalations: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit: UnitMetadata) -> Self {
        self.units.push(unit);
        self
    }

    pub fn with_object(mut self, object: ObjectMetadata) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_governance(mut self, governance: GovernanceMetadata) -> Self {
        self.governance.push(governance);
        self
    }

    pub fn with_escalation(mut self, entry: EscalationEntry) -> Self {
        self.escalations.push(entry);
        self
    }

    pub fn unit(&self, name: &UnitName) -> Option<&UnitMetadata> {
        self.units.iter().find(|u| &u.name == name)
    }

    pub fn unit_index(&self, name: &UnitName) -> Option<usize> {
        self.units.iter().position(|u| &u.name == name)
    }

    pub fn object(&self, index: ObjectIndex) -> Option<&ObjectMetadata> {
        self.objects.get(index.0)
    }

    /// Team names referenced by this office's units, deduplicated
    pub fn team_names(&self) -> Vec<&TeamName> {
        let mut teams: Vec<&TeamName> = Vec::new();
        for unit in &self.units {
            if !teams.contains(&&unit.team) {
                teams.push(&unit.team);
            }
        }
        teams
    }

    /// Administrator names referenced by this office's duties, deduplicated
    pub fn administrator_names(&self) -> Vec<&AdministratorName> {
        let mut names: Vec<&AdministratorName> = Vec::new();
        for unit in &self.units {
            for duty in unit.pre_duties.iter().chain(unit.post_duties.iter()) {
                if !names.contains(&&duty.administrator) {
                    names.push(&duty.administrator);
                }
            }
        }
        names
    }
}
