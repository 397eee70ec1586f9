//! Procedure Domain Types
//!
//! A procedure is a sequence of named steps driven by out-of-band
//! completion signals. This crate holds the plain data every participant
//! shares; the behaviour lives in `procedure-engine`.
//!
//! # Key Concepts
//!
//! - **Token**: the string a completion signal carries. A step finishes
//!   only when it is handed its own token.
//! - **OwnerName**: the registry key under which an orchestrator or leaf
//!   can be reached by components that hold no reference to it.
//! - **ProcedureDefinition**: the host-supplied declaration of a workflow,
//!   one `StepDefinition` per queue entry, nestable through delegation.
//! - **ProcedureStatus**: a point-in-time snapshot of a running procedure.
//! - **JournalEntry**: one record in an orchestrator's append-only journal.

#![deny(unsafe_code)]

mod definition;
mod errors;
mod ids;
mod journal;
mod status;

pub use definition::*;
pub use errors::*;
pub use ids::*;
pub use journal::*;
pub use status::*;
