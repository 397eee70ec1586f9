//! Steps: one queue entry each
//!
//! A step is itself a [`Procedure`], so it composes with nesting the same
//! way leaves and orchestrators do. What `begin` does depends on the kind:
//!
//! - **Marker**: looks its owner up in the registry and hands it the
//!   step's own token, exactly as an outside component would
//! - **Dispatch**: calls a handler resolved when the step was configured;
//!   nothing is awaited, completion arrives later through the registry
//! - **Delegate**: begins a nested procedure
//!
//! A step only finishes on its own token. Any other token is absorbed.

use crate::{Procedure, Registry};
use procedure_types::{OwnerName, SoftRejection, StepKind, StepStatus, Token};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Fire-and-forget command handler
pub type DispatchHandler = Rc<dyn Fn(&DispatchRequest)>;

/// What a dispatch handler receives.
///
/// To complete the step, the component eventually calls
/// `registry.signal(&request.owner, &request.token)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRequest {
    pub owner: OwnerName,
    pub token: Token,
    pub component: String,
    pub command: String,
}

/// A component/command pair bound to its handler
#[derive(Clone)]
pub struct Dispatch {
    component: String,
    command: String,
    handler: DispatchHandler,
}

impl Dispatch {
    pub fn new(
        component: impl Into<String>,
        command: impl Into<String>,
        handler: impl Fn(&DispatchRequest) + 'static,
    ) -> Self {
        Self::from_handler(component, command, Rc::new(handler))
    }

    pub fn from_handler(
        component: impl Into<String>,
        command: impl Into<String>,
        handler: DispatchHandler,
    ) -> Self {
        Self {
            component: component.into(),
            command: command.into(),
            handler,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("component", &self.component)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

enum StepTarget {
    None,
    Dispatch(Dispatch),
    Delegate(Rc<dyn Procedure>),
}

/// Result of handing a token to a step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Rejected(SoftRejection),
}

impl StepOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed)
    }
}

struct StepBinding {
    owner: OwnerName,
    registry: Weak<Registry>,
}

/// One entry in an orchestrator's queue
pub struct Step {
    id: Token,
    ignore: bool,
    target: StepTarget,
    binding: RefCell<Option<StepBinding>>,
    has_started: Cell<bool>,
    done: Cell<bool>,
}

impl Step {
    fn with_target(id: impl Into<String>, target: StepTarget) -> Self {
        Self {
            id: Token::new(id),
            ignore: false,
            target,
            binding: RefCell::new(None),
            has_started: Cell::new(false),
            done: Cell::new(false),
        }
    }

    /// A step that completes itself as soon as it begins
    pub fn marker(id: impl Into<String>) -> Self {
        Self::with_target(id, StepTarget::None)
    }

    pub fn dispatch(id: impl Into<String>, dispatch: Dispatch) -> Self {
        Self::with_target(id, StepTarget::Dispatch(dispatch))
    }

    pub fn delegate(id: impl Into<String>, procedure: Rc<dyn Procedure>) -> Self {
        Self::with_target(id, StepTarget::Delegate(procedure))
    }

    /// Keep the target but behave as a marker
    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub fn id(&self) -> &Token {
        &self.id
    }

    pub fn kind(&self) -> StepKind {
        if self.ignore {
            return StepKind::Marker;
        }
        match self.target {
            StepTarget::None => StepKind::Marker,
            StepTarget::Dispatch(_) => StepKind::Dispatch,
            StepTarget::Delegate(_) => StepKind::Delegate,
        }
    }

    /// Owner that marker completions and dispatch requests point at
    pub fn owner(&self) -> Option<OwnerName> {
        self.binding.borrow().as_ref().map(|b| b.owner.clone())
    }

    /// Point the step at `owner` in `registry`. Orchestrators do this when
    /// they queue a step; standalone steps must be bound by hand.
    pub fn bind(&self, owner: OwnerName, registry: &Rc<Registry>) {
        self.bind_weak(owner, Rc::downgrade(registry));
    }

    pub(crate) fn bind_weak(&self, owner: OwnerName, registry: Weak<Registry>) {
        *self.binding.borrow_mut() = Some(StepBinding { owner, registry });
    }

    /// Hand `token` to the step and report what happened
    pub fn receive(&self, token: &str) -> StepOutcome {
        if self.id.as_str() != token {
            return StepOutcome::Rejected(SoftRejection::MismatchedToken);
        }
        if !self.has_started.get() {
            return StepOutcome::Rejected(SoftRejection::NotStarted);
        }
        if self.done.get() {
            return StepOutcome::Rejected(SoftRejection::AlreadyDone);
        }

        self.done.set(true);
        if let Some(nested) = self.delegate_target() {
            nested.handle(token);
        }
        StepOutcome::Completed
    }

    pub fn status(&self) -> StepStatus {
        StepStatus {
            id: self.id.clone(),
            kind: self.kind(),
            has_started: self.has_started.get(),
            done: self.done.get(),
        }
    }

    fn delegate_target(&self) -> Option<Rc<dyn Procedure>> {
        match (&self.target, self.kind()) {
            (StepTarget::Delegate(nested), StepKind::Delegate) => Some(nested.clone()),
            _ => None,
        }
    }

    fn complete_through_registry(&self) {
        let binding = self
            .binding
            .borrow()
            .as_ref()
            .map(|b| (b.owner.clone(), b.registry.clone()));

        let Some((owner, registry)) = binding else {
            tracing::warn!(token = %self.id, "Marker step has no owner and cannot complete");
            return;
        };
        let Some(registry) = registry.upgrade() else {
            tracing::warn!(owner = %owner, token = %self.id, "Registry dropped; marker completion lost");
            return;
        };

        if let Err(err) = registry.signal(owner.as_str(), self.id.as_str()) {
            tracing::warn!(
                owner = %owner,
                token = %self.id,
                error = %err,
                "Marker completion dropped"
            );
        }
    }

    fn dispatch_request(&self, dispatch: &Dispatch) -> DispatchRequest {
        DispatchRequest {
            owner: self.owner().unwrap_or_else(|| OwnerName::new("")),
            token: self.id.clone(),
            component: dispatch.component.clone(),
            command: dispatch.command.clone(),
        }
    }
}

impl Procedure for Step {
    fn begin(&self) {
        if self.done.get() || self.has_started.get() {
            tracing::debug!(token = %self.id, "Step already begun");
            return;
        }
        self.has_started.set(true);

        match (&self.target, self.kind()) {
            (StepTarget::Dispatch(dispatch), StepKind::Dispatch) => {
                let request = self.dispatch_request(dispatch);
                tracing::debug!(
                    owner = %request.owner,
                    token = %self.id,
                    component = %dispatch.component,
                    command = %dispatch.command,
                    "Dispatching"
                );
                let handler = dispatch.handler.clone();
                handler(&request);
            }
            (StepTarget::Delegate(nested), StepKind::Delegate) => {
                let nested = nested.clone();
                nested.begin();
            }
            _ => self.complete_through_registry(),
        }
    }

    fn handle(&self, token: &str) {
        if let StepOutcome::Rejected(reason) = self.receive(token) {
            tracing::trace!(token = %self.id, received = token, %reason, "Step ignored token");
        }
    }

    fn reset(&self) {
        self.has_started.set(false);
        self.done.set(false);
        if let Some(nested) = self.delegate_target() {
            nested.reset();
        }
    }

    fn has_started(&self) -> bool {
        self.has_started.get()
    }

    fn is_done(&self) -> bool {
        self.done.get()
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("owner", &self.owner())
            .field("has_started", &self.has_started.get())
            .field("done", &self.done.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Leaf;
    use procedure_types::ProcedureError;

    fn recording_dispatch(log: &Rc<RefCell<Vec<DispatchRequest>>>) -> Dispatch {
        let log = log.clone();
        Dispatch::new("camera", "pan", move |request| {
            log.borrow_mut().push(request.clone())
        })
    }

    #[test]
    fn test_kinds() {
        let registry = Rc::new(Registry::new());
        let leaf = Leaf::new(&registry, "Sub");
        let log = Rc::new(RefCell::new(Vec::new()));

        assert_eq!(Step::marker("a").kind(), StepKind::Marker);
        assert_eq!(
            Step::dispatch("b", recording_dispatch(&log)).kind(),
            StepKind::Dispatch
        );
        assert_eq!(Step::delegate("c", leaf.clone()).kind(), StepKind::Delegate);
        assert_eq!(
            Step::delegate("d", leaf).ignored().kind(),
            StepKind::Marker
        );
    }

    #[test]
    fn test_marker_completes_through_owner() {
        let registry = Rc::new(Registry::new());
        let owner = Leaf::new(&registry, "Owner");
        let step = Step::marker("s1");
        step.bind(OwnerName::new("Owner"), &registry);

        step.begin();
        assert!(step.has_started());
        // The marker signalled its owner, not itself
        assert!(owner.is_done());
        assert!(!step.is_done());
    }

    #[test]
    fn test_unbound_marker_stays_open() {
        let step = Step::marker("s1");
        step.begin();
        assert!(step.has_started());
        assert!(!step.is_done());
    }

    #[test]
    fn test_dispatch_is_fire_and_forget() {
        let registry = Rc::new(Registry::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let step = Step::dispatch("pan", recording_dispatch(&log));
        step.bind(OwnerName::new("Intro"), &registry);

        step.begin();
        assert!(!step.is_done());
        let requests = log.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].owner.as_str(), "Intro");
        assert_eq!(requests[0].token.as_str(), "pan");
        assert_eq!(requests[0].component, "camera");
        assert_eq!(requests[0].command, "pan");
    }

    #[test]
    fn test_dispatch_to_unregistered_owner() {
        let registry = Rc::new(Registry::new());
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let sink = dropped.clone();
        let collaborator_registry = registry.clone();
        let step = Step::dispatch(
            "pan",
            Dispatch::new("camera", "pan", move |request| {
                if let Err(err) =
                    collaborator_registry.signal(request.owner.as_str(), request.token.as_str())
                {
                    sink.borrow_mut().push(err);
                }
            }),
        );
        step.bind(OwnerName::new("Ghost"), &registry);

        step.begin();
        let errors = dropped.borrow();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ProcedureError::UnknownOwner(name) if name.as_str() == "Ghost"));
        assert!(!step.is_done());
    }

    #[test]
    fn test_receive_matches_only_own_token() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let step = Step::dispatch("pan", recording_dispatch(&log));

        assert_eq!(
            step.receive("pan"),
            StepOutcome::Rejected(SoftRejection::NotStarted)
        );
        step.begin();
        assert_eq!(
            step.receive("zoom"),
            StepOutcome::Rejected(SoftRejection::MismatchedToken)
        );
        assert!(!step.is_done());
        assert_eq!(step.receive("pan"), StepOutcome::Completed);
        assert!(step.is_done());
        assert_eq!(
            step.receive("pan"),
            StepOutcome::Rejected(SoftRejection::AlreadyDone)
        );
    }

    #[test]
    fn test_delegate_forwards_begin_handle_reset() {
        let registry = Rc::new(Registry::new());
        let leaf = Leaf::new(&registry, "Sub");
        let step = Step::delegate("s2", leaf.clone());

        step.begin();
        assert!(leaf.has_started());

        step.handle("other");
        assert!(!leaf.is_done());

        step.handle("s2");
        assert!(step.is_done());
        assert!(leaf.is_done());

        step.reset();
        assert!(!step.has_started());
        assert!(!leaf.has_started());
        assert!(!leaf.is_done());
    }

    #[test]
    fn test_ignored_delegate_does_not_touch_target() {
        let registry = Rc::new(Registry::new());
        let leaf = Leaf::new(&registry, "Sub");
        let step = Step::delegate("s2", leaf.clone()).ignored();

        step.begin();
        assert!(!leaf.has_started());
    }

    #[test]
    fn test_begin_twice_dispatches_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let step = Step::dispatch("pan", recording_dispatch(&log));
        step.begin();
        step.begin();
        assert_eq!(log.borrow().len(), 1);
    }
}
