//! Journal records: the ordered trail an orchestrator leaves behind

use crate::{RunId, SoftRejection, StepKind, Token};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One journaled event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    /// Run the event belongs to; absent for events outside a run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunId>,
    pub event: JournalEvent,
}

impl JournalEntry {
    pub fn new(run: Option<RunId>, event: JournalEvent) -> Self {
        Self {
            at: Utc::now(),
            run,
            event,
        }
    }

    /// Whether this entry mentions the given step token
    pub fn involves_token(&self, token: &Token) -> bool {
        match &self.event {
            JournalEvent::StepBegun { token: t, .. } | JournalEvent::StepCompleted { token: t } => {
                t == token
            }
            JournalEvent::Advanced { from, to } => {
                from.as_ref() == Some(token) || to.as_ref() == Some(token)
            }
            JournalEvent::Ignored { token: t, .. } => t.as_ref() == Some(token),
            _ => false,
        }
    }
}

/// Kinds of journaled events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEvent {
    Begun,
    StepBegun { token: Token, kind: StepKind },
    StepCompleted { token: Token },
    /// Queue moved from one step to the next; `to` is absent when it drained
    Advanced {
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<Token>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<Token>,
    },
    Ignored {
        reason: SoftRejection,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<Token>,
    },
    Completed { steps: usize },
    Reset,
}

impl std::fmt::Display for JournalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalEvent::Begun => write!(f, "begun"),
            JournalEvent::StepBegun { token, kind } => write!(f, "step '{}' begun ({})", token, kind),
            JournalEvent::StepCompleted { token } => write!(f, "step '{}' completed", token),
            JournalEvent::Advanced { from, to } => write!(
                f,
                "advanced {} -> {}",
                from.as_ref().map(Token::as_str).unwrap_or("-"),
                to.as_ref().map(Token::as_str).unwrap_or("-")
            ),
            JournalEvent::Ignored { reason, token } => match token {
                Some(token) => write!(f, "ignored '{}': {}", token, reason),
                None => write!(f, "ignored: {}", reason),
            },
            JournalEvent::Completed { steps } => write!(f, "completed after {} steps", steps),
            JournalEvent::Reset => write!(f, "reset"),
        }
    }
}
