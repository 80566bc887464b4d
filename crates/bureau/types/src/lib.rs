//! Bureau Domain Types
//!
//! An office is a scheduling domain. An external compiler turns declarative
//! configuration into the static graph described here; the kernel reads the
//! graph exactly once at open time and never mutates it.
//!
//! # Key Concepts
//!
//! - **OfficeModel**: The compiled graph of one office — its schedulable
//!   units, managed object sources, governance bindings, administrators,
//!   and escalation table.
//! - **UnitMetadata**: One schedulable unit — team binding, object
//!   dependencies, pre/post duties, next link and flow branch table.
//! - **ObjectMetadata**: One managed object source — scope, sourcing mode,
//!   dependencies, pooling, governance indices.
//! - **EscalationEntry**: One `(failure match, handling unit)` pair of the
//!   office's ordered escalation table.
//! - **Failure**: The runtime failure value routed through escalation.
//!
//! # Design Principles
//!
//! 1. Metadata is immutable value data. The kernel references it by index,
//!    never by shared mutable object.
//! 2. Every cross-reference in the graph is validated before the kernel
//!    opens; a malformed graph is refused, not scheduled.
//! 3. Failure routing is explicit. Nothing is silently swallowed.

#![deny(unsafe_code)]

mod errors;
mod failure;
mod ids;
mod model;
mod validate;

pub use errors::*;
pub use failure::*;
pub use ids::*;
pub use model::*;
pub use validate::validate;
