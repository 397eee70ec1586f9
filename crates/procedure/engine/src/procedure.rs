//! The capability every participant shares, and its simplest implementation
//!
//! A [`Leaf`] does no sequencing. Its work is whatever an external
//! collaborator does once it sees the leaf begin, for instance a
//! presentation component starting an animation. Any completion call
//! finishes it; the token is not inspected.

use crate::{OrchestratorConfig, ProcedureOrchestrator, Registry};
use procedure_types::{OwnerName, ProcedureState};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Begin / handle / reset, with observable progress flags.
///
/// Implementations use interior mutability: a `begin` may re-enter the
/// same procedure through the registry before it returns.
pub trait Procedure {
    fn begin(&self);

    fn handle(&self, token: &str);

    fn reset(&self);

    /// True once begun since the last reset
    fn has_started(&self) -> bool;

    /// True once the work is finished
    fn is_done(&self) -> bool;

    fn state(&self) -> ProcedureState {
        ProcedureState::from_flags(self.has_started(), self.is_done())
    }

    /// Downcast used by hosts that need queue-level detail
    fn as_orchestrator(&self) -> Option<&ProcedureOrchestrator> {
        None
    }
}

type BeginObserver = Rc<dyn Fn(&OwnerName)>;

/// A procedure that only records that it began and that it was completed
pub struct Leaf {
    name: OwnerName,
    has_started: Cell<bool>,
    done: Cell<bool>,
    diagnostics: bool,
    observers: RefCell<Vec<BeginObserver>>,
}

impl Leaf {
    /// Create a leaf and register it under `name`.
    ///
    /// If the name is taken the registry keeps the earlier entry and this
    /// leaf is reachable only through the returned handle.
    pub fn new(registry: &Rc<Registry>, name: impl Into<String>) -> Rc<Self> {
        Self::with_config(registry, name, OrchestratorConfig::default())
    }

    pub fn with_config(
        registry: &Rc<Registry>,
        name: impl Into<String>,
        config: OrchestratorConfig,
    ) -> Rc<Self> {
        let leaf = Rc::new(Self {
            name: OwnerName::new(name),
            has_started: Cell::new(false),
            done: Cell::new(false),
            diagnostics: config.diagnostics,
            observers: RefCell::new(Vec::new()),
        });
        registry.register(leaf.name.clone(), leaf.clone());
        leaf
    }

    pub fn name(&self) -> &OwnerName {
        &self.name
    }

    /// Call `observer` every time the leaf begins
    pub fn on_begin(&self, observer: impl Fn(&OwnerName) + 'static) {
        self.observers.borrow_mut().push(Rc::new(observer));
    }
}

impl Procedure for Leaf {
    fn begin(&self) {
        self.has_started.set(true);
        if self.diagnostics {
            tracing::debug!(owner = %self.name, "Leaf begun");
        }

        let observers: Vec<BeginObserver> = self.observers.borrow().clone();
        for observer in observers {
            observer(&self.name);
        }
    }

    fn handle(&self, token: &str) {
        // A completion implies the work happened, so keep done => started.
        self.has_started.set(true);
        self.done.set(true);
        if self.diagnostics {
            tracing::debug!(owner = %self.name, token, "Leaf completed");
        }
    }

    fn reset(&self) {
        self.has_started.set(false);
        self.done.set(false);
    }

    fn has_started(&self) -> bool {
        self.has_started.get()
    }

    fn is_done(&self) -> bool {
        self.done.get()
    }
}

impl std::fmt::Debug for Leaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaf")
            .field("name", &self.name)
            .field("has_started", &self.has_started.get())
            .field("done", &self.done.get())
            .finish()
    }
}
