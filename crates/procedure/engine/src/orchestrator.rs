//! Procedure Orchestrator: sequences steps and advances on completion
//!
//! The orchestrator:
//! 1. Registers itself under its own name when begun
//! 2. Copies its configured steps into a fresh queue on a cold begin
//! 3. Begins one step at a time, binding it to this owner
//! 4. Moves to the next step on every `handle` that reaches it
//! 5. Fires its completion hooks once the queue drains
//!
//! Step 4 is unconditional: a token that matches no step still advances
//! the queue by one position. Only the step itself checks the token.
//!
//! No `RefCell` borrow is held while a step, a nested procedure or a hook
//! runs. Marker steps complete by calling back into `handle` from inside
//! `begin`, and hooks are free to `reset` and `begin` again.
//!
//! A `handle` that arrives while the orchestrator is already starting steps
//! only records the advance it owes; the outermost call pays those off in a
//! loop. A long run of markers therefore drains in constant stack depth.

use crate::{Journal, Procedure, Registry, Step, StepOutcome, DEFAULT_JOURNAL_CAPACITY};
use procedure_types::{
    HookId, JournalEntry, JournalEvent, OwnerName, ProcedureError, ProcedureResult,
    ProcedureState, ProcedureStatus, RunId, SoftRejection, Token,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Configuration for an orchestrator
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Trace every begin/handle/reset at debug level
    pub diagnostics: bool,
    /// Keep a journal of events
    pub journal: bool,
    /// Most journal entries kept; older ones are evicted
    pub journal_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            diagnostics: false,
            journal: true,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

/// Passed to completion hooks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionEvent {
    pub owner: OwnerName,
    pub run: RunId,
    /// Number of steps the run went through
    pub steps: usize,
}

type CompletionHook = Rc<dyn Fn(&CompletionEvent)>;

#[derive(Default)]
struct RunState {
    has_started: bool,
    done: bool,
    run: Option<RunId>,
    queue: VecDeque<Rc<Step>>,
    current: Option<Rc<Step>>,
    completed_runs: u64,
}

/// Owns an ordered list of steps and walks through them one at a time
pub struct ProcedureOrchestrator {
    name: OwnerName,
    config: OrchestratorConfig,
    registry: Weak<Registry>,
    this: Weak<ProcedureOrchestrator>,
    steps: Vec<Rc<Step>>,
    state: RefCell<RunState>,
    hooks: RefCell<Vec<(HookId, CompletionHook)>>,
    next_hook: Cell<u64>,
    journal: RefCell<Journal>,
    draining: Cell<bool>,
    owed: RefCell<VecDeque<Option<RunId>>>,
}

impl ProcedureOrchestrator {
    /// Create an orchestrator with default configuration
    pub fn new(registry: &Rc<Registry>, name: impl Into<String>, steps: Vec<Step>) -> Rc<Self> {
        Self::with_config(registry, name, steps, OrchestratorConfig::default())
    }

    pub fn with_config(
        registry: &Rc<Registry>,
        name: impl Into<String>,
        steps: Vec<Step>,
        config: OrchestratorConfig,
    ) -> Rc<Self> {
        let name = OwnerName::new(name);
        let registry = Rc::downgrade(registry);
        let steps: Vec<Rc<Step>> = steps.into_iter().map(Rc::new).collect();
        for step in &steps {
            step.bind_weak(name.clone(), registry.clone());
        }
        let journal = if config.journal {
            Journal::with_capacity(config.journal_capacity)
        } else {
            Journal::disabled()
        };

        Rc::new_cyclic(|this| Self {
            name,
            config,
            registry,
            this: this.clone(),
            steps,
            state: RefCell::new(RunState::default()),
            hooks: RefCell::new(Vec::new()),
            next_hook: Cell::new(0),
            journal: RefCell::new(journal),
            draining: Cell::new(false),
            owed: RefCell::new(VecDeque::new()),
        })
    }

    pub fn name(&self) -> &OwnerName {
        &self.name
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register under this orchestrator's name. Idempotent; the first
    /// registrant of a name keeps it.
    pub fn register(&self) -> ProcedureResult<OwnerName> {
        let registry = self
            .registry
            .upgrade()
            .ok_or(ProcedureError::RegistryDropped)?;
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| ProcedureError::Released(self.name.clone()))?;
        Ok(registry.register(self.name.clone(), this))
    }

    // ── Completion Hooks ─────────────────────────────────────────────

    /// Call `hook` once each time a run completes
    pub fn on_complete(&self, hook: impl Fn(&CompletionEvent) + 'static) -> HookId {
        let id = HookId(self.next_hook.get());
        self.next_hook.set(id.0 + 1);
        self.hooks.borrow_mut().push((id, Rc::new(hook)));
        id
    }

    /// Unsubscribe a hook; false if it was not subscribed
    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    // ── Query ────────────────────────────────────────────────────────

    pub fn steps(&self) -> &[Rc<Step>] {
        &self.steps
    }

    pub fn current_token(&self) -> Option<Token> {
        self.state
            .borrow()
            .current
            .as_ref()
            .map(|step| step.id().clone())
    }

    /// Tokens still queued behind the current step
    pub fn pending_tokens(&self) -> Vec<Token> {
        self.state
            .borrow()
            .queue
            .iter()
            .map(|step| step.id().clone())
            .collect()
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.state.borrow().run
    }

    pub fn completed_runs(&self) -> u64 {
        self.state.borrow().completed_runs
    }

    pub fn status(&self) -> ProcedureStatus {
        let state = self.state.borrow();
        ProcedureStatus {
            name: self.name.clone(),
            state: ProcedureState::from_flags(state.has_started, state.done),
            current: state.current.as_ref().map(|step| step.id().clone()),
            pending: state.queue.iter().map(|step| step.id().clone()).collect(),
            completed_runs: state.completed_runs,
            steps: self.steps.iter().map(|step| step.status()).collect(),
        }
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.borrow().entries().cloned().collect()
    }

    pub fn journal_len(&self) -> usize {
        self.journal.borrow().count()
    }

    pub fn clear_journal(&self) {
        self.journal.borrow_mut().clear();
    }

    // ── Internals ────────────────────────────────────────────────────

    fn record(&self, event: JournalEvent) {
        let run = self.state.borrow().run;
        self.journal.borrow_mut().record(run, event);
    }

    fn reject(&self, reason: SoftRejection, token: Option<&str>) {
        tracing::debug!(owner = %self.name, token, %reason, "Call absorbed");
        self.record(JournalEvent::Ignored {
            reason,
            token: token.map(Token::new),
        });
    }

    /// Make `step` current and begin it
    fn start_step(&self, step: Rc<Step>) {
        step.bind_weak(self.name.clone(), self.registry.clone());
        self.record(JournalEvent::StepBegun {
            token: step.id().clone(),
            kind: step.kind(),
        });
        if self.config.diagnostics {
            tracing::debug!(owner = %self.name, token = %step.id(), kind = %step.kind(), "Step begun");
        }
        step.begin();
    }

    /// Run `first`, then every advance owed by `handle` calls it triggered.
    ///
    /// Nested calls run `first` and return; only the outermost call loops.
    fn drain(&self, first: impl FnOnce(&Self)) {
        if self.draining.get() {
            first(self);
            return;
        }

        self.draining.set(true);
        first(self);
        loop {
            let owed = self.owed.borrow_mut().pop_front();
            let Some(run) = owed else { break };
            if self.is_running(run) {
                self.advance();
            }
        }
        self.draining.set(false);
    }

    fn is_running(&self, run: Option<RunId>) -> bool {
        let state = self.state.borrow();
        state.has_started && !state.done && state.run == run
    }

    /// Pop the next step, or complete when the queue is empty
    fn advance(&self) {
        let (from, next) = {
            let mut state = self.state.borrow_mut();
            let next = state.queue.pop_front();
            let from = std::mem::replace(&mut state.current, next.clone());
            (from, next)
        };

        self.record(JournalEvent::Advanced {
            from: from.as_ref().map(|step| step.id().clone()),
            to: next.as_ref().map(|step| step.id().clone()),
        });

        match next {
            Some(step) => self.start_step(step),
            None => self.complete(),
        }
    }

    fn complete(&self) {
        let run = {
            let mut state = self.state.borrow_mut();
            state.done = true;
            state.current = None;
            state.queue.clear();
            state.completed_runs += 1;
            state.run.unwrap_or_else(RunId::generate)
        };

        let steps = self.steps.len();
        self.record(JournalEvent::Completed { steps });
        tracing::info!(owner = %self.name, run = %run.short(), steps, "Procedure completed");

        let event = CompletionEvent {
            owner: self.name.clone(),
            run,
            steps,
        };
        let hooks: Vec<CompletionHook> = self
            .hooks
            .borrow()
            .iter()
            .map(|(_, hook)| hook.clone())
            .collect();
        for hook in hooks {
            hook(&event);
        }
    }
}

impl Procedure for ProcedureOrchestrator {
    fn begin(&self) {
        if let Err(err) = self.register() {
            tracing::warn!(owner = %self.name, error = %err, "Could not register procedure");
        }

        let first = {
            let mut state = self.state.borrow_mut();
            if state.done || state.has_started {
                None
            } else {
                state.has_started = true;
                state.run = Some(RunId::generate());
                state.queue = self.steps.iter().cloned().collect();
                let first = state.queue.pop_front();
                state.current = first.clone();
                Some(first)
            }
        };

        let Some(first) = first else {
            let reason = if self.is_done() {
                SoftRejection::AlreadyDone
            } else {
                SoftRejection::AlreadyRunning
            };
            self.reject(reason, None);
            return;
        };

        self.record(JournalEvent::Begun);
        tracing::info!(owner = %self.name, steps = self.steps.len(), "Procedure begun");

        self.drain(|this| match first {
            Some(step) => this.start_step(step),
            None => this.complete(),
        });
    }

    fn handle(&self, token: &str) {
        let (done, has_started, current, run) = {
            let state = self.state.borrow();
            (
                state.done,
                state.has_started,
                state.current.clone(),
                state.run,
            )
        };

        if done {
            self.reject(SoftRejection::AlreadyDone, Some(token));
            return;
        }
        if token.is_empty() {
            // An empty token is how callers cancel a completion
            self.reject(SoftRejection::EmptyToken, None);
            return;
        }
        if !has_started {
            self.reject(SoftRejection::NotStarted, Some(token));
            return;
        }

        if self.config.diagnostics {
            tracing::debug!(owner = %self.name, token, "Handling");
        }

        if let Some(step) = current {
            match step.receive(token) {
                StepOutcome::Completed => self.record(JournalEvent::StepCompleted {
                    token: step.id().clone(),
                }),
                StepOutcome::Rejected(reason) => self.reject(reason, Some(token)),
            }
        }

        // Skipped at payoff if forwarding re-entered and finished or reset
        // this run.
        self.owed.borrow_mut().push_back(run);
        self.drain(|_| {});
    }

    fn reset(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.has_started = false;
            state.done = false;
            state.queue.clear();
            state.current = None;
        }
        self.record(JournalEvent::Reset);
        self.state.borrow_mut().run = None;
        if self.config.diagnostics {
            tracing::debug!(owner = %self.name, "Procedure reset");
        }

        for step in &self.steps {
            step.reset();
        }
    }

    fn has_started(&self) -> bool {
        self.state.borrow().has_started
    }

    fn is_done(&self) -> bool {
        self.state.borrow().done
    }

    fn as_orchestrator(&self) -> Option<&ProcedureOrchestrator> {
        Some(self)
    }
}

impl std::fmt::Debug for ProcedureOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureOrchestrator")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dispatch, Leaf};

    fn quiet_dispatch(component: &str) -> Dispatch {
        Dispatch::new(component, "play", |_| {})
    }

    fn dispatch_steps(ids: &[&str]) -> Vec<Step> {
        ids.iter()
            .map(|id| Step::dispatch(*id, quiet_dispatch("stage")))
            .collect()
    }

    fn completion_counter(orch: &ProcedureOrchestrator) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let sink = count.clone();
        orch.on_complete(move |_| sink.set(sink.get() + 1));
        count
    }

    #[test]
    fn test_begin_registers_and_starts_first_step() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a", "b"]));
        assert!(!registry.contains("Intro"));

        orch.begin();
        assert!(registry.contains("Intro"));
        assert_eq!(orch.current_token().unwrap(), "a");
        assert_eq!(orch.pending_tokens(), vec![Token::new("b")]);
        assert_eq!(orch.state(), ProcedureState::Running);
    }

    #[test]
    fn test_empty_orchestrator_completes_on_begin() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Empty", Vec::new());
        let count = completion_counter(&orch);

        orch.begin();
        assert!(orch.has_started());
        assert!(orch.is_done());
        assert_eq!(count.get(), 1);
        assert!(orch.current_token().is_none());
    }

    #[test]
    fn test_handle_advances_and_completes() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a", "b"]));
        let count = completion_counter(&orch);

        orch.begin();
        orch.handle("a");
        assert_eq!(orch.current_token().unwrap(), "b");
        orch.handle("b");
        assert!(orch.is_done());
        assert_eq!(count.get(), 1);
        assert!(orch.steps().iter().all(|s| s.is_done()));
    }

    #[test]
    fn test_mismatched_token_still_advances() {
        let registry = Rc::new(Registry::new());
        let orch =
            ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["A", "B", "C"]));

        orch.begin();
        assert_eq!(orch.current_token().unwrap(), "A");
        orch.handle("Z");
        assert_eq!(orch.current_token().unwrap(), "B");
        assert!(!orch.steps()[0].is_done());
    }

    #[test]
    fn test_begin_while_running_is_ignored() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a", "b"]));
        orch.begin();
        let run = orch.current_run();
        orch.begin();
        assert_eq!(orch.current_run(), run);
        assert_eq!(orch.current_token().unwrap(), "a");
        assert!(orch.journal().iter().any(|e| e.event
            == JournalEvent::Ignored {
                reason: SoftRejection::AlreadyRunning,
                token: None
            }));
    }

    #[test]
    fn test_begin_and_handle_after_done_are_ignored() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", vec![Step::marker("m")]);
        let count = completion_counter(&orch);

        orch.begin();
        assert!(orch.is_done());
        orch.begin();
        orch.handle("m");
        assert_eq!(count.get(), 1);
        assert_eq!(orch.completed_runs(), 1);
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a", "b"]));
        orch.begin();
        orch.handle("");
        assert_eq!(orch.current_token().unwrap(), "a");
    }

    #[test]
    fn test_handle_before_begin_is_ignored() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a"]));
        orch.handle("a");
        assert!(!orch.has_started());
        assert!(!orch.is_done());
    }

    #[test]
    fn test_markers_drain_on_begin() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(
            &registry,
            "Intro",
            vec![Step::marker("a"), Step::marker("b"), Step::marker("c")],
        );
        let count = completion_counter(&orch);

        orch.begin();
        assert!(orch.is_done());
        assert_eq!(count.get(), 1);
        assert!(orch.steps().iter().all(|s| s.is_done()));
    }

    #[test]
    fn test_reset_returns_to_idle_and_cascades() {
        let registry = Rc::new(Registry::new());
        let sub = Leaf::new(&registry, "Sub");
        let orch = ProcedureOrchestrator::new(
            &registry,
            "Intro",
            vec![Step::delegate("s1", sub.clone())],
        );

        orch.begin();
        assert!(sub.has_started());
        orch.reset();
        assert_eq!(orch.state(), ProcedureState::Idle);
        assert!(orch.current_token().is_none());
        assert!(orch.pending_tokens().is_empty());
        assert!(!sub.has_started());

        orch.begin();
        assert!(sub.has_started());
        assert_eq!(orch.current_token().unwrap(), "s1");
    }

    #[test]
    fn test_each_run_gets_new_id() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a"]));
        let runs = Rc::new(RefCell::new(Vec::new()));
        let sink = runs.clone();
        orch.on_complete(move |event| sink.borrow_mut().push(event.run));

        orch.begin();
        orch.handle("a");
        orch.reset();
        orch.begin();
        orch.handle("a");

        let runs = runs.borrow();
        assert_eq!(runs.len(), 2);
        assert_ne!(runs[0], runs[1]);
        assert_eq!(orch.completed_runs(), 2);
    }

    #[test]
    fn test_hook_can_restart_workflow() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Loop", dispatch_steps(&["a"]));
        let weak = Rc::downgrade(&orch);
        let hook = orch.on_complete(move |_| {
            if let Some(orch) = weak.upgrade() {
                orch.reset();
                orch.begin();
            }
        });

        orch.begin();
        orch.handle("a");
        assert_eq!(orch.completed_runs(), 1);
        assert_eq!(orch.state(), ProcedureState::Running);
        assert_eq!(orch.current_token().unwrap(), "a");

        assert!(orch.remove_hook(hook));
        assert!(!orch.remove_hook(hook));
        orch.handle("a");
        assert!(orch.is_done());
    }

    #[test]
    fn test_status_snapshot() {
        let registry = Rc::new(Registry::new());
        let orch =
            ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a", "b", "c"]));
        orch.begin();
        orch.handle("a");

        let status = orch.status();
        assert_eq!(status.name.as_str(), "Intro");
        assert_eq!(status.state, ProcedureState::Running);
        assert_eq!(status.current, Some(Token::new("b")));
        assert_eq!(status.pending, vec![Token::new("c")]);
        assert_eq!(status.done_count(), 1);
    }

    #[test]
    fn test_journal_records_run() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", dispatch_steps(&["a"]));
        orch.begin();
        orch.handle("a");

        let events: Vec<JournalEvent> = orch.journal().into_iter().map(|e| e.event).collect();
        assert_eq!(events.first(), Some(&JournalEvent::Begun));
        assert!(events.contains(&JournalEvent::StepCompleted {
            token: Token::new("a")
        }));
        assert_eq!(events.last(), Some(&JournalEvent::Completed { steps: 1 }));
        let run = orch.current_run().unwrap();
        assert!(orch.journal().iter().all(|e| e.run == Some(run)));
    }

    #[test]
    fn test_journal_can_be_disabled() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::with_config(
            &registry,
            "Quiet",
            dispatch_steps(&["a"]),
            OrchestratorConfig {
                diagnostics: true,
                journal: false,
                ..OrchestratorConfig::default()
            },
        );
        orch.begin();
        orch.handle("a");
        assert!(orch.is_done());
        assert_eq!(orch.journal_len(), 0);
    }

    #[test]
    fn test_register_fails_after_registry_dropped() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::new(&registry, "Intro", Vec::new());
        drop(registry);
        assert!(matches!(
            orch.register(),
            Err(ProcedureError::RegistryDropped)
        ));
        // begin still works locally
        orch.begin();
        assert!(orch.is_done());
    }

    #[test]
    fn test_long_marker_run_drains_without_nesting() {
        let registry = Rc::new(Registry::new());
        let steps = (0..10_000).map(|i| Step::marker(format!("m{}", i))).collect();
        let orch = ProcedureOrchestrator::new(&registry, "Long", steps);
        let count = completion_counter(&orch);

        orch.begin();
        assert!(orch.is_done());
        assert_eq!(count.get(), 1);
        assert!(orch.steps().iter().all(|s| s.is_done()));
    }

    #[test]
    fn test_markers_after_dispatch_drain_on_handle() {
        let registry = Rc::new(Registry::new());
        let mut steps = dispatch_steps(&["d"]);
        steps.extend((0..5_000).map(|i| Step::marker(format!("m{}", i))));
        steps.extend(dispatch_steps(&["tail"]));
        let orch = ProcedureOrchestrator::new(&registry, "Intro", steps);

        orch.begin();
        orch.handle("d");
        assert_eq!(orch.current_token().unwrap(), "tail");
        assert!(orch.pending_tokens().is_empty());
    }

    #[test]
    fn test_journal_stays_bounded_across_runs() {
        let registry = Rc::new(Registry::new());
        let orch = ProcedureOrchestrator::with_config(
            &registry,
            "Loop",
            vec![Step::marker("m")],
            OrchestratorConfig {
                journal_capacity: 64,
                ..OrchestratorConfig::default()
            },
        );

        for _ in 0..1_000 {
            orch.reset();
            orch.begin();
            assert!(orch.is_done());
        }
        assert_eq!(orch.completed_runs(), 1_000);
        assert_eq!(orch.journal_len(), 64);
        assert_eq!(
            orch.journal().last().map(|e| e.event.clone()),
            Some(JournalEvent::Completed { steps: 1 })
        );
    }
}
