//! Procedure definitions: the declarative form a host hands to the builder
//!
//! A definition names an orchestrator and lists its steps in order. A step
//! with no target (or with `ignore` set) is a marker; otherwise its target
//! says whether it dispatches a command to a component or delegates to a
//! nested procedure.
//!
//! ```json
//! {
//!   "name": "Intro",
//!   "steps": [
//!     { "id": "fade-in" },
//!     { "id": "pan", "target": { "kind": "dispatch", "component": "camera", "command": "pan" } },
//!     { "id": "sub", "target": { "kind": "delegate", "procedure": { "leaf": { "name": "Sub" } } } }
//!   ]
//! }
//! ```

use crate::{OwnerName, ProcedureError, ProcedureResult, StepKind, Token};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Declaration of an orchestrator and its ordered steps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDefinition {
    pub name: OwnerName,
    /// Emit per-operation diagnostics
    #[serde(default)]
    pub diagnostics: bool,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl ProcedureDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: OwnerName::new(name),
            diagnostics: false,
            steps: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Parse a definition from JSON and validate it
    pub fn from_json(json: &str) -> ProcedureResult<Self> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn to_json_pretty(&self) -> ProcedureResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the whole definition tree.
    ///
    /// Owner names must be non-empty and unique across the tree, and every
    /// step needs a non-empty token.
    pub fn validate(&self) -> ProcedureResult<()> {
        let mut seen = HashSet::new();
        self.validate_into(&mut seen)
    }

    fn validate_into(&self, seen: &mut HashSet<OwnerName>) -> ProcedureResult<()> {
        check_owner(&self.name, seen)?;

        for step in &self.steps {
            if step.id.is_empty() {
                return Err(ProcedureError::InvalidDefinition(format!(
                    "step in '{}' has an empty id",
                    self.name
                )));
            }
            match &step.target {
                Some(TargetDefinition::Dispatch { component, command }) => {
                    if component.is_empty() || command.is_empty() {
                        return Err(ProcedureError::InvalidDefinition(format!(
                            "dispatch step '{}' needs a component and a command",
                            step.id
                        )));
                    }
                }
                Some(TargetDefinition::Delegate { procedure }) => match procedure {
                    DelegateDefinition::Leaf { name } => check_owner(name, seen)?,
                    DelegateDefinition::Orchestrator(nested) => nested.validate_into(seen)?,
                },
                None => {}
            }
        }

        Ok(())
    }

    /// Every owner name declared in the tree, this one first
    pub fn owner_names(&self) -> Vec<OwnerName> {
        let mut names = vec![self.name.clone()];
        for step in &self.steps {
            if let Some(TargetDefinition::Delegate { procedure }) = &step.target {
                match procedure {
                    DelegateDefinition::Leaf { name } => names.push(name.clone()),
                    DelegateDefinition::Orchestrator(nested) => names.extend(nested.owner_names()),
                }
            }
        }
        names
    }

    /// Distinct component names referenced by dispatch steps anywhere in the tree
    pub fn components(&self) -> BTreeSet<String> {
        let mut components = BTreeSet::new();
        for step in &self.steps {
            match &step.target {
                Some(TargetDefinition::Dispatch { component, .. }) => {
                    components.insert(component.clone());
                }
                Some(TargetDefinition::Delegate {
                    procedure: DelegateDefinition::Orchestrator(nested),
                }) => components.extend(nested.components()),
                _ => {}
            }
        }
        components
    }
}

fn check_owner(name: &OwnerName, seen: &mut HashSet<OwnerName>) -> ProcedureResult<()> {
    if name.as_str().is_empty() {
        return Err(ProcedureError::InvalidDefinition(
            "owner name must not be empty".into(),
        ));
    }
    if !seen.insert(name.clone()) {
        return Err(ProcedureError::DuplicateOwner(name.clone()));
    }
    Ok(())
}

/// One queue entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Completion token the step waits for
    pub id: Token,
    /// Treat the step as a marker even if it has a target
    #[serde(default)]
    pub ignore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetDefinition>,
}

impl StepDefinition {
    pub fn marker(id: impl Into<String>) -> Self {
        Self {
            id: Token::new(id),
            ignore: false,
            target: None,
        }
    }

    pub fn dispatch(
        id: impl Into<String>,
        component: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: Token::new(id),
            ignore: false,
            target: Some(TargetDefinition::Dispatch {
                component: component.into(),
                command: command.into(),
            }),
        }
    }

    pub fn delegate_leaf(id: impl Into<String>, leaf: impl Into<String>) -> Self {
        Self {
            id: Token::new(id),
            ignore: false,
            target: Some(TargetDefinition::Delegate {
                procedure: DelegateDefinition::Leaf {
                    name: OwnerName::new(leaf),
                },
            }),
        }
    }

    pub fn delegate(id: impl Into<String>, nested: ProcedureDefinition) -> Self {
        Self {
            id: Token::new(id),
            ignore: false,
            target: Some(TargetDefinition::Delegate {
                procedure: DelegateDefinition::Orchestrator(nested),
            }),
        }
    }

    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    /// Effective kind: a missing target or the ignore flag make a marker
    pub fn kind(&self) -> StepKind {
        if self.ignore {
            return StepKind::Marker;
        }
        match &self.target {
            None => StepKind::Marker,
            Some(TargetDefinition::Dispatch { .. }) => StepKind::Dispatch,
            Some(TargetDefinition::Delegate { .. }) => StepKind::Delegate,
        }
    }
}

/// Where a step sends its work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetDefinition {
    Dispatch { component: String, command: String },
    Delegate { procedure: DelegateDefinition },
}

/// A nested procedure a delegate step begins
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegateDefinition {
    Leaf { name: OwnerName },
    Orchestrator(ProcedureDefinition),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intro() -> ProcedureDefinition {
        ProcedureDefinition::new("Intro")
            .with_step(StepDefinition::marker("s1"))
            .with_step(StepDefinition::delegate_leaf("s2", "Sub"))
    }

    #[test]
    fn test_kind_derivation() {
        assert_eq!(StepDefinition::marker("a").kind(), StepKind::Marker);
        assert_eq!(
            StepDefinition::dispatch("a", "camera", "pan").kind(),
            StepKind::Dispatch
        );
        assert_eq!(
            StepDefinition::delegate_leaf("a", "Sub").kind(),
            StepKind::Delegate
        );
        assert_eq!(
            StepDefinition::dispatch("a", "camera", "pan").ignored().kind(),
            StepKind::Marker
        );
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "name": "Intro",
            "diagnostics": true,
            "steps": [
                { "id": "s1" },
                { "id": "s2", "target": { "kind": "dispatch", "component": "camera", "command": "pan" } },
                { "id": "s3", "target": { "kind": "delegate", "procedure": { "leaf": { "name": "Sub" } } } },
                { "id": "s4", "target": { "kind": "delegate", "procedure": { "orchestrator": {
                    "name": "Inner", "steps": [ { "id": "i1" } ] } } } }
            ]
        }"#;
        let def = ProcedureDefinition::from_json(json).unwrap();
        assert!(def.diagnostics);
        assert_eq!(def.steps.len(), 4);
        let kinds: Vec<_> = def.steps.iter().map(StepDefinition::kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Marker,
                StepKind::Dispatch,
                StepKind::Delegate,
                StepKind::Delegate
            ]
        );
        assert_eq!(
            def.owner_names(),
            vec![
                OwnerName::new("Intro"),
                OwnerName::new("Sub"),
                OwnerName::new("Inner")
            ]
        );
        assert_eq!(def.components().into_iter().collect::<Vec<_>>(), vec!["camera"]);
    }

    #[test]
    fn test_validate_ok() {
        assert!(intro().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_step_id() {
        let def = ProcedureDefinition::new("Intro").with_step(StepDefinition::marker(""));
        assert!(matches!(
            def.validate(),
            Err(ProcedureError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_validate_duplicate_owner() {
        let def = intro().with_step(StepDefinition::delegate(
            "s3",
            ProcedureDefinition::new("Sub"),
        ));
        assert!(matches!(
            def.validate(),
            Err(ProcedureError::DuplicateOwner(name)) if name.as_str() == "Sub"
        ));
    }

    #[test]
    fn test_validate_empty_dispatch_target() {
        let def = ProcedureDefinition::new("Intro")
            .with_step(StepDefinition::dispatch("s1", "", "pan"));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            ProcedureDefinition::from_json("{ not json"),
            Err(ProcedureError::Json(_))
        ));
    }

    #[test]
    fn test_json_roundtrip_keeps_structure() {
        let def = intro();
        let json = def.to_json_pretty().unwrap();
        assert!(!json.contains("\"target\": null"));
        let parsed = ProcedureDefinition::from_json(&json).unwrap();
        assert_eq!(parsed, def);
    }
}
