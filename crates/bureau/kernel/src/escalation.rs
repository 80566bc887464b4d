//! Escalation: layered failure routing from unit to office to top level
//!
//! An uncaught failure first looks for the nearest matching entry in the
//! office's escalation procedure. A match instigates the handling flow in
//! a new thread of the same process with the failure as parameter. No
//! match — or a failure inside a handling flow — reaches the top-level
//! handler, the terminal sink. A failure there is fatal to the process:
//! it is force-completed and the event recorded as a diagnostic, never
//! re-escalated.

use bureau_types::{Failure, OfficeModel, ProcessId};
use chrono::{DateTime, Utc};

/// The terminal failure sink behind every escalation procedure
pub trait EscalationHandler: Send + Sync {
    fn handle(&self, process: ProcessId, failure: &Failure) -> Result<(), Failure>;
}

/// Default top-level handler: report and swallow
pub struct LoggingEscalationHandler;

impl EscalationHandler for LoggingEscalationHandler {
    fn handle(&self, process: ProcessId, failure: &Failure) -> Result<(), Failure> {
        tracing::error!(%process, %failure, "failure reached top-level handler");
        Ok(())
    }
}

/// An office's compiled escalation table: ordered entries with handler
/// unit names resolved to unit indices
pub(crate) struct EscalationProcedure {
    entries: Vec<(bureau_types::FailureMatch, usize)>,
}

impl EscalationProcedure {
    pub(crate) fn compile(model: &OfficeModel) -> Self {
        let entries = model
            .escalations
            .iter()
            .filter_map(|entry| {
                model
                    .unit_index(&entry.handler)
                    .map(|index| (entry.matches.clone(), index))
            })
            .collect();
        Self { entries }
    }

    /// Most-specific match wins: an exact code match anywhere in the
    /// table beats the first category (or any) match in registration
    /// order.
    pub(crate) fn handler_for(&self, failure: &Failure) -> Option<usize> {
        if let Some((_, unit)) = self
            .entries
            .iter()
            .find(|(matches, _)| matches.is_exact() && matches.matches(failure))
        {
            return Some(*unit);
        }
        self.entries
            .iter()
            .find(|(matches, _)| !matches.is_exact() && matches.matches(failure))
            .map(|(_, unit)| *unit)
    }
}

/// What a recorded diagnostic is about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The top-level handler itself failed; the process was force-completed
    HandlerFailure,
    /// The process was force-completed by shutdown
    ForcedCompletion,
}

/// A kernel-level incident exposed through the management surface
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub process: ProcessId,
    pub kind: DiagnosticKind,
    pub detail: String,
    pub failure: Option<Failure>,
}

impl Diagnostic {
    pub(crate) fn handler_failure(process: ProcessId, failure: Failure) -> Self {
        Self {
            at: Utc::now(),
            process,
            kind: DiagnosticKind::HandlerFailure,
            detail: format!("top-level handler failed: {failure}"),
            failure: Some(failure),
        }
    }

    pub(crate) fn forced_completion(process: ProcessId, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            process,
            kind: DiagnosticKind::ForcedCompletion,
            detail: detail.into(),
            failure: None,
        }
    }
}

/// Where a failure routes next
pub(crate) enum EscalationRoute {
    /// Instigate this unit as a handling flow in a new thread
    Handle(usize),
    /// Deliver to the process's source-registered handler
    Source,
    /// Deliver to the top-level handler
    TopLevel,
}

/// Decide the route for a failure raised in a thread of a process.
///
/// Handling flows never re-enter the table; source-invoked processes use
/// the source's handler as their procedure tier.
pub(crate) fn route(
    escalation_handling: bool,
    source_invoked: bool,
    procedure: &EscalationProcedure,
    failure: &Failure,
) -> EscalationRoute {
    if escalation_handling {
        return EscalationRoute::TopLevel;
    }
    if source_invoked {
        return EscalationRoute::Source;
    }
    match procedure.handler_for(failure) {
        Some(unit) => EscalationRoute::Handle(unit),
        None => EscalationRoute::TopLevel,
    }
}
