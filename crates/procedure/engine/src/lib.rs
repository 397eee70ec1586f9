//! Procedure Orchestration Core
//!
//! Sequences named steps across components that never reference each
//! other. A step completes when someone hands its owner the step's token
//! through the [`Registry`]; the orchestrator then moves its queue along.
//!
//! # Architecture
//!
//! Everything that can be begun, handed a token and reset implements
//! [`Procedure`]:
//!
//! - [`Leaf`]: records that it started and that a completion arrived
//! - [`Step`]: one queue entry: a marker, a dispatch or a delegation
//! - [`ProcedureOrchestrator`]: owns the queue and advances it
//!
//! Supporting pieces:
//!
//! - [`Registry`]: owner name to procedure; the out-of-band channel
//! - [`Journal`]: ordered record of what each orchestrator did
//! - [`ProcedureBuilder`]: turns a `ProcedureDefinition` into a live tree
//! - [`Driver`]: single-writer thread for async or multi-threaded hosts
//!
//! # Example
//!
//! ```rust
//! use procedure_engine::{Leaf, Procedure, ProcedureOrchestrator, Registry, Step};
//! use std::rc::Rc;
//!
//! let registry = Rc::new(Registry::new());
//! let sub = Leaf::new(&registry, "Sub");
//!
//! let intro = ProcedureOrchestrator::new(
//!     &registry,
//!     "Intro",
//!     vec![Step::marker("s1"), Step::delegate("s2", sub.clone())],
//! );
//! intro.begin();
//!
//! // s1 completed itself through the registry; s2 began the leaf
//! assert!(sub.has_started());
//! assert_eq!(intro.current_token().unwrap().as_str(), "s2");
//!
//! registry.signal("Intro", "s2").unwrap();
//! assert!(intro.is_done());
//! ```

#![deny(unsafe_code)]

pub mod builder;
pub mod driver;
pub mod journal;
pub mod orchestrator;
pub mod procedure;
pub mod registry;
pub mod step;

pub use builder::{ComponentTable, ProcedureBuilder};
pub use driver::{Driver, DriverHandle, WeakDriverHandle};
pub use journal::{Journal, DEFAULT_JOURNAL_CAPACITY};
pub use orchestrator::{CompletionEvent, OrchestratorConfig, ProcedureOrchestrator};
pub use procedure::{Leaf, Procedure};
pub use registry::Registry;
pub use step::{Dispatch, DispatchHandler, DispatchRequest, Step, StepOutcome};

pub use procedure_types::*;
