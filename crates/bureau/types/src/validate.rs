//! Validator: checks a compiled office graph for consistency
//!
//! Validation happens once, before the kernel opens an office. It catches
//! graphs that are structurally well-formed but semantically wrong: dangling
//! links, out-of-range indices, dependency cycles. Registry checks (teams,
//! administrators, work implementations) are the kernel builder's job since
//! they need the runtime registries.

use crate::errors::{ConfigError, ConfigResult};
use crate::{ObjectIndex, ObjectMetadata, OfficeModel};
use std::collections::HashSet;

/// Validate an office model for internal consistency
pub fn validate(model: &OfficeModel) -> ConfigResult<()> {
    validate_has_units(model)?;
    validate_unique_unit_names(model)?;
    validate_unique_object_names(model)?;
    validate_unique_governance_names(model)?;
    validate_unit_links(model)?;
    validate_escalation_handlers(model)?;
    validate_object_indices(model)?;
    validate_governance_indices(model)?;
    validate_object_dependencies(model)?;
    Ok(())
}

fn validate_has_units(model: &OfficeModel) -> ConfigResult<()> {
    if model.units.is_empty() {
        return Err(ConfigError::EmptyOffice(model.name.clone()));
    }
    Ok(())
}

fn validate_unique_unit_names(model: &OfficeModel) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for unit in &model.units {
        if !seen.insert(&unit.name) {
            return Err(ConfigError::DuplicateUnit(unit.name.clone()));
        }
    }
    Ok(())
}

fn validate_unique_object_names(model: &OfficeModel) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for object in &model.objects {
        if !seen.insert(&object.name) {
            return Err(ConfigError::DuplicateObject(object.name.clone()));
        }
    }
    Ok(())
}

fn validate_unique_governance_names(model: &OfficeModel) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for governance in &model.governance {
        if !seen.insert(&governance.name) {
            return Err(ConfigError::DuplicateGovernance(governance.name.clone()));
        }
    }
    Ok(())
}

fn validate_unit_links(model: &OfficeModel) -> ConfigResult<()> {
    for unit in &model.units {
        if let Some(next) = &unit.next {
            if model.unit(next).is_none() {
                return Err(ConfigError::DanglingNextLink {
                    unit: unit.name.clone(),
                    next: next.clone(),
                });
            }
        }
        for target in &unit.flows {
            if model.unit(target).is_none() {
                return Err(ConfigError::DanglingFlowTarget {
                    unit: unit.name.clone(),
                    target: target.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_escalation_handlers(model: &OfficeModel) -> ConfigResult<()> {
    for entry in &model.escalations {
        if model.unit(&entry.handler).is_none() {
            return Err(ConfigError::DanglingEscalationHandler {
                handler: entry.handler.clone(),
            });
        }
    }
    Ok(())
}

fn validate_object_indices(model: &OfficeModel) -> ConfigResult<()> {
    let bound = model.objects.len();
    for unit in &model.units {
        for index in &unit.dependencies {
            if index.0 >= bound {
                return Err(ConfigError::UnknownObjectIndex {
                    context: format!("{}", unit.name),
                    index: *index,
                });
            }
        }
    }
    for object in &model.objects {
        for index in &object.dependencies {
            if index.0 >= bound {
                return Err(ConfigError::UnknownObjectIndex {
                    context: format!("{}", object.name),
                    index: *index,
                });
            }
        }
    }
    Ok(())
}

fn validate_governance_indices(model: &OfficeModel) -> ConfigResult<()> {
    let bound = model.governance.len();
    for object in &model.objects {
        for index in &object.governance {
            if index.0 >= bound {
                return Err(ConfigError::UnknownGovernanceIndex {
                    context: format!("{}", object.name),
                    index: *index,
                });
            }
        }
    }
    for unit in &model.units {
        for duty in unit.pre_duties.iter().chain(unit.post_duties.iter()) {
            for mapping in &duty.governance_map {
                if mapping.thread.0 >= bound {
                    return Err(ConfigError::UnknownGovernanceIndex {
                        context: format!("{} duty {}", unit.name, duty.duty),
                        index: mapping.thread,
                    });
                }
            }
        }
    }
    Ok(())
}

fn validate_object_dependencies(model: &OfficeModel) -> ConfigResult<()> {
    for object in &model.objects {
        for index in &object.dependencies {
            let dependency = &model.objects[index.0];
            if dependency.scope.width() < object.scope.width() {
                return Err(ConfigError::ScopeOrderViolation {
                    object: object.name.clone(),
                    object_scope: object.scope,
                    dependency: dependency.name.clone(),
                });
            }
        }
    }

    // Depth-first walk with an on-path set to detect cycles
    for (i, object) in model.objects.iter().enumerate() {
        let mut on_path = HashSet::new();
        walk_dependencies(&model.objects, ObjectIndex(i), object, &mut on_path)?;
    }
    Ok(())
}

fn walk_dependencies(
    objects: &[ObjectMetadata],
    index: ObjectIndex,
    origin: &ObjectMetadata,
    on_path: &mut HashSet<ObjectIndex>,
) -> ConfigResult<()> {
    if !on_path.insert(index) {
        return Err(ConfigError::ObjectDependencyCycle(origin.name.clone()));
    }
    for dependency in &objects[index.0].dependencies {
        walk_dependencies(objects, *dependency, origin, on_path)?;
    }
    on_path.remove(&index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EscalationEntry, FailureMatch, GovernanceMetadata, ObjectScope, UnitMetadata,
    };

    fn minimal_office() -> OfficeModel {
        OfficeModel::new("orders")
            .with_object(ObjectMetadata::new("ledger", ObjectScope::Process))
            .with_unit(UnitMetadata::new("bill", "fast").with_dependency(0))
            .with_unit(UnitMetadata::new("ship", "fast"))
    }

    #[test]
    fn test_valid_minimal() {
        assert!(validate(&minimal_office()).is_ok());
    }

    #[test]
    fn test_empty_office() {
        let model = OfficeModel::new("orders");
        assert!(matches!(
            validate(&model),
            Err(ConfigError::EmptyOffice(_))
        ));
    }

    #[test]
    fn test_duplicate_unit() {
        let model = minimal_office().with_unit(UnitMetadata::new("bill", "slow"));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::DuplicateUnit(_))
        ));
    }

    #[test]
    fn test_dangling_next_link() {
        let model = minimal_office().with_unit(UnitMetadata::new("refund", "fast").with_next("missing"));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::DanglingNextLink { .. })
        ));
    }

    #[test]
    fn test_dangling_flow_target() {
        let model = minimal_office().with_unit(UnitMetadata::new("refund", "fast").with_flow("missing"));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::DanglingFlowTarget { .. })
        ));
    }

    #[test]
    fn test_dangling_escalation_handler() {
        let model = minimal_office()
            .with_escalation(EscalationEntry::new(FailureMatch::Any, "missing"));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::DanglingEscalationHandler { .. })
        ));
    }

    #[test]
    fn test_object_index_out_of_range() {
        let model = minimal_office().with_unit(UnitMetadata::new("refund", "fast").with_dependency(7));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::UnknownObjectIndex { .. })
        ));
    }

    #[test]
    fn test_governance_index_out_of_range() {
        let model = minimal_office()
            .with_object(ObjectMetadata::new("till", ObjectScope::Thread).with_governance(3));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::UnknownGovernanceIndex { .. })
        ));
    }

    #[test]
    fn test_duty_governance_map_out_of_range() {
        let model = minimal_office().with_unit(
            UnitMetadata::new("refund", "fast").with_pre_duty(
                crate::DutyMetadata::new("audit", "record").with_governance(0, 5),
            ),
        );
        assert!(matches!(
            validate(&model),
            Err(ConfigError::UnknownGovernanceIndex { .. })
        ));
    }

    #[test]
    fn test_governed_object_accepted() {
        let model = OfficeModel::new("orders")
            .with_governance(GovernanceMetadata::new("audit-window"))
            .with_object(ObjectMetadata::new("ledger", ObjectScope::Thread).with_governance(0))
            .with_unit(UnitMetadata::new("bill", "fast").with_dependency(0));
        assert!(validate(&model).is_ok());
    }

    #[test]
    fn test_object_dependency_cycle() {
        let model = OfficeModel::new("orders")
            .with_object(ObjectMetadata::new("a", ObjectScope::Process).with_dependency(1))
            .with_object(ObjectMetadata::new("b", ObjectScope::Process).with_dependency(0))
            .with_unit(UnitMetadata::new("bill", "fast"));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::ObjectDependencyCycle(_))
        ));
    }

    #[test]
    fn test_scope_order_violation() {
        // A process-scoped object cannot depend on a thread-scoped one
        let model = OfficeModel::new("orders")
            .with_object(ObjectMetadata::new("wide", ObjectScope::Process).with_dependency(1))
            .with_object(ObjectMetadata::new("narrow", ObjectScope::Thread))
            .with_unit(UnitMetadata::new("bill", "fast"));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::ScopeOrderViolation { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let model = OfficeModel::new("orders")
            .with_object(ObjectMetadata::new("a", ObjectScope::Process).with_dependency(0))
            .with_unit(UnitMetadata::new("bill", "fast"));
        assert!(matches!(
            validate(&model),
            Err(ConfigError::ObjectDependencyCycle(_))
        ));
    }
}
