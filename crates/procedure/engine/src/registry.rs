//! Registry: owner name to procedure
//!
//! The registry is how completion reaches a procedure without a reference
//! to it. A component that knows an owner name and a token can finish a
//! step with [`Registry::signal`].
//!
//! The host owns the registry (usually one per process, or one per test).
//! Procedures keep only weak references back to it, so dropping it or
//! calling [`Registry::clear`] releases every registered procedure.

use crate::Procedure;
use procedure_types::{OwnerName, ProcedureError, ProcedureResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Name-indexed table of procedures
pub struct Registry {
    entries: RefCell<HashMap<OwnerName, Rc<dyn Procedure>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Register `procedure` under `name`.
    ///
    /// First registrant wins: a second registration under the same name is
    /// ignored. Returns the name either way.
    pub fn register(&self, name: OwnerName, procedure: Rc<dyn Procedure>) -> OwnerName {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&name) {
            return name;
        }
        tracing::trace!(owner = %name, "Procedure registered");
        entries.insert(name.clone(), procedure);
        name
    }

    /// Find the procedure registered under `name`
    pub fn lookup(&self, name: &str) -> ProcedureResult<Rc<dyn Procedure>> {
        self.entries
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| ProcedureError::UnknownOwner(OwnerName::new(name)))
    }

    /// Hand `token` to the procedure registered under `name`.
    ///
    /// The registry borrow is released before the procedure runs, so the
    /// call may register, look up or signal again.
    pub fn signal(&self, name: &str, token: &str) -> ProcedureResult<()> {
        let procedure = self.lookup(name)?;
        procedure.handle(token);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<OwnerName> {
        let mut names: Vec<OwnerName> = self.entries.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every entry
    pub fn clear(&self) {
        let drained: Vec<Rc<dyn Procedure>> = self
            .entries
            .borrow_mut()
            .drain()
            .map(|(_, procedure)| procedure)
            .collect();
        tracing::debug!(count = drained.len(), "Registry cleared");
        // Entries drop here, after the borrow is released.
        drop(drained);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}
