//! Office runtimes: a compiled model joined with its registered
//! collaborators
//!
//! The registry is explicit dependency injection: work implementations,
//! object sources, governance sources, and administrators all enter
//! through the builder, keyed by the names the model uses. Every
//! cross-reference is resolved once at build time; a mismatch refuses the
//! office with a configuration error instead of failing at schedule time.

use crate::duty::Administration;
use crate::escalation::EscalationProcedure;
use crate::governance::GovernanceSource;
use crate::object::ObjectSource;
use crate::team::Team;
use crate::work::Work;
use bureau_types::{
    validate, AdministratorName, ConfigError, ConfigResult, Failure, GovernanceIndex,
    GovernanceName, ObjectIndex, ObjectName, OfficeModel, OfficeName, TeamName, UnitName,
};
use std::collections::HashMap;
use std::sync::Arc;

/// The collaborators an office model needs, keyed by name
#[derive(Default)]
pub struct OfficeRegistry {
    works: HashMap<UnitName, Arc<dyn Work>>,
    sources: HashMap<ObjectName, Arc<dyn ObjectSource>>,
    governance: HashMap<GovernanceName, Arc<dyn GovernanceSource>>,
    administrators: HashMap<AdministratorName, Arc<dyn Administration>>,
}

impl OfficeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work(mut self, unit: impl Into<String>, work: impl Work + 'static) -> Self {
        self.works.insert(UnitName::new(unit), Arc::new(work));
        self
    }

    pub fn with_object_source(
        mut self,
        object: impl Into<String>,
        source: impl ObjectSource + 'static,
    ) -> Self {
        self.sources
            .insert(ObjectName::new(object), Arc::new(source));
        self
    }

    pub fn with_shared_object_source(
        mut self,
        object: impl Into<String>,
        source: Arc<dyn ObjectSource>,
    ) -> Self {
        self.sources.insert(ObjectName::new(object), source);
        self
    }

    pub fn with_governance_source(
        mut self,
        governance: impl Into<String>,
        source: impl GovernanceSource + 'static,
    ) -> Self {
        self.governance
            .insert(GovernanceName::new(governance), Arc::new(source));
        self
    }

    pub fn with_administrator(
        mut self,
        administrator: impl Into<String>,
        administration: impl Administration + 'static,
    ) -> Self {
        self.administrators
            .insert(AdministratorName::new(administrator), Arc::new(administration));
        self
    }
}

/// A validated office: immutable model plus resolved collaborators
pub(crate) struct OfficeRuntime {
    model: OfficeModel,
    /// Work implementations by unit index
    works: Vec<Arc<dyn Work>>,
    /// Executing team by unit index
    teams: Vec<Arc<dyn Team>>,
    /// Object sources by object index
    sources: Vec<Arc<dyn ObjectSource>>,
    /// Governance sources by governance index
    governance: Vec<Arc<dyn GovernanceSource>>,
    administrators: HashMap<AdministratorName, Arc<dyn Administration>>,
    procedure: EscalationProcedure,
}

impl OfficeRuntime {
    pub(crate) fn build(
        model: OfficeModel,
        registry: OfficeRegistry,
        teams: &HashMap<TeamName, Arc<dyn Team>>,
    ) -> ConfigResult<Self> {
        validate(&model)?;

        let mut unit_works = Vec::with_capacity(model.units.len());
        let mut unit_teams = Vec::with_capacity(model.units.len());
        for unit in &model.units {
            let work = registry
                .works
                .get(&unit.name)
                .ok_or_else(|| ConfigError::UnknownWork(unit.name.clone()))?;
            unit_works.push(Arc::clone(work));
            let team = teams.get(&unit.team).ok_or_else(|| ConfigError::UnknownTeam {
                unit: unit.name.clone(),
                team: unit.team.clone(),
            })?;
            unit_teams.push(Arc::clone(team));
            for duty in unit.pre_duties.iter().chain(unit.post_duties.iter()) {
                if !registry.administrators.contains_key(&duty.administrator) {
                    return Err(ConfigError::UnknownAdministrator(duty.administrator.clone()));
                }
            }
        }

        let mut object_sources = Vec::with_capacity(model.objects.len());
        for object in &model.objects {
            let source = registry
                .sources
                .get(&object.name)
                .ok_or_else(|| ConfigError::UnknownObjectSource(object.name.clone()))?;
            object_sources.push(Arc::clone(source));
        }

        let mut governance_sources = Vec::with_capacity(model.governance.len());
        for governance in &model.governance {
            let source = registry.governance.get(&governance.name).ok_or_else(|| {
                ConfigError::UnknownGovernanceSource(governance.name.clone())
            })?;
            governance_sources.push(Arc::clone(source));
        }

        let procedure = EscalationProcedure::compile(&model);
        Ok(Self {
            model,
            works: unit_works,
            teams: unit_teams,
            sources: object_sources,
            governance: governance_sources,
            administrators: registry.administrators,
            procedure,
        })
    }

    pub(crate) fn model(&self) -> &OfficeModel {
        &self.model
    }

    pub(crate) fn name(&self) -> &OfficeName {
        &self.model.name
    }

    pub(crate) fn procedure(&self) -> &EscalationProcedure {
        &self.procedure
    }

    pub(crate) fn unit_index(&self, unit: &UnitName) -> Result<usize, Failure> {
        self.model
            .unit_index(unit)
            .ok_or_else(|| Failure::resource(format!("{} is not a unit of {}", unit, self.name())))
    }

    pub(crate) fn work_for(&self, unit_index: usize) -> Arc<dyn Work> {
        Arc::clone(&self.works[unit_index])
    }

    pub(crate) fn team_for(&self, unit_index: usize) -> Arc<dyn Team> {
        Arc::clone(&self.teams[unit_index])
    }

    pub(crate) fn object_source(&self, index: ObjectIndex) -> Arc<dyn ObjectSource> {
        Arc::clone(&self.sources[index.0])
    }

    pub(crate) fn governance_source(
        &self,
        index: GovernanceIndex,
    ) -> Result<Arc<dyn GovernanceSource>, Failure> {
        self.governance
            .get(index.0)
            .cloned()
            .ok_or_else(|| Failure::resource(format!("{index} is not bound in {}", self.name())))
    }

    pub(crate) fn administrator(
        &self,
        name: &AdministratorName,
    ) -> Result<Arc<dyn Administration>, Failure> {
        self.administrators.get(name).cloned().ok_or_else(|| {
            Failure::resource(format!("{name} is not registered in {}", self.name()))
        })
    }

    /// Point-in-time summary for the management surface
    pub(crate) fn summary(&self) -> OfficeSummary {
        OfficeSummary {
            name: self.model.name.clone(),
            units: self
                .model
                .units
                .iter()
                .map(|unit| UnitSummary {
                    name: unit.name.clone(),
                    team: unit.team.clone(),
                })
                .collect(),
        }
    }
}

/// Read-only snapshot of one office for introspection
#[derive(Clone, Debug)]
pub struct OfficeSummary {
    pub name: OfficeName,
    pub units: Vec<UnitSummary>,
}

/// Read-only snapshot of one schedulable unit
#[derive(Clone, Debug)]
pub struct UnitSummary {
    pub name: UnitName,
    pub team: TeamName,
}
