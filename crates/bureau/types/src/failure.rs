//! Runtime failure taxonomy
//!
//! Failures are values routed through the escalation chain — a failure is
//! never silently swallowed. The same `Failure` value is handed to the
//! matching handling flow as its parameter, captured on the process handle
//! when it reaches the top-level handler, and recorded as a diagnostic when
//! the top-level handler itself fails.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A failure raised while executing a job node
#[derive(Clone, Debug)]
pub struct Failure {
    /// What class of failure this is
    pub kind: FailureKind,
    /// Human-readable detail
    pub detail: String,
    /// The underlying error, if one exists
    pub source: Option<Arc<dyn Error + Send + Sync>>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn Error + 'static))
    }
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            source: None,
        }
    }

    /// A domain error raised by a unit or duty body
    pub fn business(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Business(code.into()), detail)
    }

    /// A managed object failed to source or reported a failed operation
    pub fn resource(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Resource, detail)
    }

    /// A bounded join or wait expired
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, detail)
    }

    /// An escalation handling flow itself failed
    pub fn handler(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Handler, detail)
    }

    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// The coarse classification used for category matching
    pub fn category(&self) -> FailureCategory {
        self.kind.category()
    }
}

/// The precise failure discriminator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A unit's or duty's execution raised a domain error, tagged with a
    /// business-defined code
    Business(String),
    /// A managed object failed to source, or an asynchronous operation
    /// reported failure
    Resource,
    /// A bounded join or wait expired
    Timeout,
    /// An escalation handling flow failed
    Handler,
}

impl FailureKind {
    pub fn category(&self) -> FailureCategory {
        match self {
            FailureKind::Business(_) => FailureCategory::Business,
            FailureKind::Resource => FailureCategory::Resource,
            FailureKind::Timeout => FailureCategory::Timeout,
            FailureKind::Handler => FailureCategory::Handler,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Business(code) => write!(f, "business failure ({})", code),
            FailureKind::Resource => write!(f, "resource failure"),
            FailureKind::Timeout => write!(f, "timeout failure"),
            FailureKind::Handler => write!(f, "handler failure"),
        }
    }
}

/// Coarse failure classification, the "supertype" axis of escalation matching
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    Business,
    Resource,
    Timeout,
    Handler,
}

/// What an escalation entry matches against
///
/// Most-specific wins: an exact `Code` match beats any `Category` match,
/// which beats `Any`. Within a specificity tier, registration order decides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureMatch {
    /// Matches a business failure with exactly this code
    Code(String),
    /// Matches every failure of the category
    Category(FailureCategory),
    /// Matches every failure
    Any,
}

impl FailureMatch {
    pub fn matches(&self, failure: &Failure) -> bool {
        match self {
            FailureMatch::Code(code) => {
                matches!(&failure.kind, FailureKind::Business(c) if c == code)
            }
            FailureMatch::Category(category) => failure.category() == *category,
            FailureMatch::Any => true,
        }
    }

    /// True for `Code` matches, which always win over category matches
    pub fn is_exact(&self) -> bool {
        matches!(self, FailureMatch::Code(_))
    }
}
