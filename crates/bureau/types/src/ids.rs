//! Identifiers for the office graph and the running kernel

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! name_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

name_id!(
    /// A named scheduling domain
    OfficeName,
    "office"
);
name_id!(
    /// A schedulable unit of work within an office
    UnitName,
    "unit"
);
name_id!(
    /// A named worker pool
    TeamName,
    "team"
);
name_id!(
    /// A managed object source within an office
    ObjectName,
    "object"
);
name_id!(
    /// A named governance binding
    GovernanceName,
    "governance"
);
name_id!(
    /// A named administrator providing duty bodies
    AdministratorName,
    "administrator"
);
name_id!(
    /// A duty discriminator understood by its administrator
    DutyName,
    "duty"
);

/// Index of a managed object binding within its scope owner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectIndex(pub usize);

impl fmt::Display for ObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Index into a thread's governance activation set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GovernanceIndex(pub usize);

impl fmt::Display for GovernanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "governance#{}", self.0)
    }
}

/// Identifier of one invoked top-level unit of work
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(uuid::Uuid);

impl ProcessId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_display() {
        assert_eq!(UnitName::new("bill").to_string(), "unit:bill");
        assert_eq!(TeamName::new("fast").to_string(), "team:fast");
        assert_eq!(OfficeName::new("orders").as_str(), "orders");
    }

    #[test]
    fn test_name_equality() {
        assert_eq!(UnitName::new("a"), UnitName::from("a"));
        assert_ne!(UnitName::new("a"), UnitName::new("b"));
    }

    #[test]
    fn test_process_ids_unique() {
        assert_ne!(ProcessId::generate(), ProcessId::generate());
    }

    #[test]
    fn test_serde_transparent() {
        let name = UnitName::new("bill");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"bill\"");
        let back: UnitName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
