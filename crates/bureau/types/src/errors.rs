//! Error types for office configuration and kernel lifecycle

use crate::{
    AdministratorName, GovernanceIndex, GovernanceName, ObjectIndex, ObjectName, OfficeName,
    TeamName, UnitName,
};

/// A malformed or missing link in the static graph, detected at startup.
/// The kernel refuses to open a domain whose graph is inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("office has no units: {0}")]
    EmptyOffice(OfficeName),

    #[error("duplicate unit: {0}")]
    DuplicateUnit(UnitName),

    #[error("duplicate object: {0}")]
    DuplicateObject(ObjectName),

    #[error("duplicate governance: {0}")]
    DuplicateGovernance(GovernanceName),

    #[error("unit {unit} links to unknown next unit {next}")]
    DanglingNextLink { unit: UnitName, next: UnitName },

    #[error("unit {unit} flow branch targets unknown unit {target}")]
    DanglingFlowTarget { unit: UnitName, target: UnitName },

    #[error("escalation entry targets unknown handling unit {handler}")]
    DanglingEscalationHandler { handler: UnitName },

    #[error("{context} references unknown object index {index}")]
    UnknownObjectIndex { context: String, index: ObjectIndex },

    #[error("{context} references unknown governance index {index}")]
    UnknownGovernanceIndex {
        context: String,
        index: GovernanceIndex,
    },

    #[error("object dependency cycle through {0}")]
    ObjectDependencyCycle(ObjectName),

    #[error("object {object} ({object_scope:?} scope) depends on narrower-scoped {dependency}")]
    ScopeOrderViolation {
        object: ObjectName,
        object_scope: crate::ObjectScope,
        dependency: ObjectName,
    },

    #[error("unit {unit} is bound to unregistered team {team}")]
    UnknownTeam { unit: UnitName, team: TeamName },

    #[error("duty references unregistered administrator {0}")]
    UnknownAdministrator(AdministratorName),

    #[error("no work implementation registered for unit {0}")]
    UnknownWork(UnitName),

    #[error("no source registered for object {0}")]
    UnknownObjectSource(ObjectName),

    #[error("no source registered for governance {0}")]
    UnknownGovernanceSource(GovernanceName),
}

/// Result type alias for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Kernel lifecycle and invocation errors
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("kernel is not open")]
    NotOpen,

    #[error("kernel is already open")]
    AlreadyOpen,

    #[error("duplicate office registered: {0}")]
    DuplicateOffice(OfficeName),

    #[error("duplicate team registered: {0}")]
    DuplicateTeam(TeamName),

    #[error("unknown office: {0}")]
    UnknownOffice(OfficeName),

    #[error("unknown unit {unit} in office {office}")]
    UnknownUnit { office: OfficeName, unit: UnitName },

    #[error("close timed out with {remaining} process(es) still active")]
    CloseTimeout { remaining: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::DanglingNextLink {
            unit: UnitName::new("bill"),
            next: UnitName::new("missing"),
        };
        assert!(err.to_string().contains("unit:bill"));
        assert!(err.to_string().contains("unit:missing"));
    }

    #[test]
    fn test_config_error_converts_to_kernel_error() {
        let err: KernelError = ConfigError::EmptyOffice(OfficeName::new("orders")).into();
        assert!(matches!(err, KernelError::Config(_)));
    }
}
