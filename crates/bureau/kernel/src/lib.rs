//! Bureau Execution Kernel
//!
//! A lock-coordinated, user-space scheduler running inside one OS process.
//! Invoking a unit of work creates a process, which creates a logical
//! thread, which creates a flow, which creates the first job node and
//! hands it to the node's team. Team threads pull nodes, execute them, and
//! feed results back; the kernel decides the next nodes, detects
//! flow/thread/process completion, and drives governance and escalation.
//!
//! # Key Concepts
//!
//! - **Bureau**: The kernel instance — `open()`, `invoke()`, `close()`,
//!   plus read-only introspection.
//! - **Team**: A pluggable worker pool. The kernel holds no threads of its
//!   own; every job body runs on a team thread.
//! - **Work / Administration / Governance / ObjectSource**: The capability
//!   interfaces business code implements, registered by name through the
//!   builder — no globals, no reflection.
//! - **ProcessHandle**: Future-like view of one invocation: completion,
//!   captured failure, completion callback.
//!
//! # Design Principles
//!
//! 1. Suspension never blocks a team thread: jobs park and are reassigned
//!    to their team on wake.
//! 2. Completion counting is monotonic and atomic per level — job, flow,
//!    thread, process.
//! 3. Failures always route through the escalation chain; configuration
//!    failures are fatal at startup, not at schedule time.

#![deny(unsafe_code)]

mod asset;
mod duty;
mod escalation;
mod flow;
mod governance;
mod handle;
mod job;
mod object;
mod office;
mod process;
mod runtime;
mod synchroniser;
mod team;
mod thread;
mod work;

pub use duty::{Administration, DutyContext};
pub use escalation::{Diagnostic, DiagnosticKind, EscalationHandler, LoggingEscalationHandler};
pub use flow::FlowHandle;
pub use governance::{DeactivationStrategy, Governance, GovernanceSource};
pub use handle::ProcessHandle;
pub use object::{
    AsyncContext, ContainerView, ObjectHandle, ObjectInstance, ObjectSource, SourcingContext,
};
pub use office::{OfficeRegistry, OfficeSummary, UnitSummary};
pub use process::ProcessOutcome;
pub use runtime::{Bureau, BureauBuilder, KernelConfig};
pub use synchroniser::ThreadSynchroniser;
pub use team::{Assignment, InlineTeam, PoolTeam, SpawnTeam, Team};
pub use work::{payload, Payload, Work, WorkContext};

// The metadata vocabulary is re-exported so callers depend on one crate.
pub use bureau_types::{
    validate, AdministratorName, ConfigError, ConfigResult, DutyMetadata, DutyName,
    EscalationEntry, Failure, FailureCategory, FailureKind, FailureMatch, FlowStrategy,
    GovernanceIndex, GovernanceMapping, GovernanceMetadata, GovernanceName, KernelError,
    KernelResult, ObjectIndex, ObjectMetadata, ObjectName, ObjectScope, OfficeModel, OfficeName,
    ProcessId, SourcingMode, TeamName, UnitMetadata, UnitName,
};
