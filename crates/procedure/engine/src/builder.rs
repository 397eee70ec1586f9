//! Builder: turns a `ProcedureDefinition` into a live procedure tree
//!
//! Dispatch targets name a component and a command. The builder resolves
//! each component against a [`ComponentTable`] once, at configuration
//! time, and stores the handler on the step. Nothing is looked up by
//! string when a step runs.

use crate::{
    Dispatch, DispatchHandler, DispatchRequest, Leaf, OrchestratorConfig, Procedure,
    ProcedureOrchestrator, Registry, Step,
};
use procedure_types::{
    DelegateDefinition, ProcedureDefinition, ProcedureError, ProcedureResult, StepDefinition,
    TargetDefinition,
};
use std::collections::HashMap;
use std::rc::Rc;

/// Component name to dispatch handler
#[derive(Clone, Default)]
pub struct ComponentTable {
    components: HashMap<String, DispatchHandler>,
}

impl ComponentTable {
    pub fn new() -> Self {
        Self {
            components: HashMap::new(),
        }
    }

    pub fn with_component(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&DispatchRequest) + 'static,
    ) -> Self {
        self.insert(name, handler);
        self
    }

    /// Add or replace a component
    pub fn insert(&mut self, name: impl Into<String>, handler: impl Fn(&DispatchRequest) + 'static) {
        self.components.insert(name.into(), Rc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<DispatchHandler> {
        self.components.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl std::fmt::Debug for ComponentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.components.keys().collect();
        names.sort();
        f.debug_struct("ComponentTable")
            .field("components", &names)
            .finish()
    }
}

/// Builds orchestrators, leaves and steps from definitions
pub struct ProcedureBuilder<'a> {
    registry: &'a Rc<Registry>,
    components: &'a ComponentTable,
    config: OrchestratorConfig,
}

impl<'a> ProcedureBuilder<'a> {
    pub fn new(registry: &'a Rc<Registry>, components: &'a ComponentTable) -> Self {
        Self {
            registry,
            components,
            config: OrchestratorConfig::default(),
        }
    }

    /// Base configuration for every orchestrator built. A definition's own
    /// `diagnostics` flag turns diagnostics on regardless.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate `definition` and build it.
    ///
    /// The returned orchestrator is not registered until it is begun (or
    /// [`ProcedureOrchestrator::register`] is called).
    pub fn build(&self, definition: &ProcedureDefinition) -> ProcedureResult<Rc<ProcedureOrchestrator>> {
        definition.validate()?;
        let orchestrator = self.build_orchestrator(definition)?;
        tracing::info!(
            owner = %definition.name,
            steps = definition.steps.len(),
            "Procedure built"
        );
        Ok(orchestrator)
    }

    fn build_orchestrator(
        &self,
        definition: &ProcedureDefinition,
    ) -> ProcedureResult<Rc<ProcedureOrchestrator>> {
        let steps = definition
            .steps
            .iter()
            .map(|step| self.build_step(step))
            .collect::<ProcedureResult<Vec<_>>>()?;

        let mut config = self.config.clone();
        config.diagnostics |= definition.diagnostics;

        Ok(ProcedureOrchestrator::with_config(
            self.registry,
            definition.name.as_str(),
            steps,
            config,
        ))
    }

    fn build_step(&self, definition: &StepDefinition) -> ProcedureResult<Step> {
        let id = definition.id.as_str();
        let step = match &definition.target {
            None => Step::marker(id),
            Some(TargetDefinition::Dispatch { component, command }) => {
                let handler =
                    self.components
                        .get(component)
                        .ok_or_else(|| ProcedureError::UnknownComponent {
                            component: component.clone(),
                            command: command.clone(),
                        })?;
                Step::dispatch(
                    id,
                    Dispatch::from_handler(component.as_str(), command.as_str(), handler),
                )
            }
            Some(TargetDefinition::Delegate { procedure }) => {
                Step::delegate(id, self.build_delegate(procedure)?)
            }
        };

        Ok(if definition.ignore { step.ignored() } else { step })
    }

    fn build_delegate(&self, definition: &DelegateDefinition) -> ProcedureResult<Rc<dyn Procedure>> {
        match definition {
            DelegateDefinition::Leaf { name } => {
                // A collaborator registered in advance takes the leaf's place.
                if let Ok(existing) = self.registry.lookup(name.as_str()) {
                    return Ok(existing);
                }
                let leaf: Rc<dyn Procedure> =
                    Leaf::with_config(self.registry, name.as_str(), self.config.clone());
                Ok(leaf)
            }
            DelegateDefinition::Orchestrator(nested) => {
                let nested: Rc<dyn Procedure> = self.build_orchestrator(nested)?;
                Ok(nested)
            }
        }
    }
}
