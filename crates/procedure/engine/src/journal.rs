//! Journal: records what an orchestrator did
//!
//! Every begin, step transition, absorbed call and completion is appended
//! in order, so a run can be read back after the fact.

use procedure_types::{JournalEntry, JournalEvent, RunId, Token};
use std::collections::VecDeque;

/// Entries kept when no capacity is given
pub const DEFAULT_JOURNAL_CAPACITY: usize = 256;

/// Bounded event log for one orchestrator.
///
/// Once `capacity` entries are held, each new entry evicts the oldest, so a
/// workflow that loops forever keeps a constant-size journal.
#[derive(Clone, Debug)]
pub struct Journal {
    entries: VecDeque<JournalEntry>,
    capacity: usize,
    evicted: u64,
}

impl Journal {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }

    /// A journal holding at most `capacity` entries; zero disables it
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_JOURNAL_CAPACITY)),
            capacity,
            evicted: 0,
        }
    }

    /// A journal that drops everything it is given
    pub fn disabled() -> Self {
        Self::with_capacity(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&mut self, run: Option<RunId>, event: JournalEvent) {
        if !self.is_enabled() {
            return;
        }
        tracing::trace!(event = %event, "Journal recorded");
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(JournalEntry::new(run, event));
    }

    // ── Query methods ────────────────────────────────────────────────

    /// Retained entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    pub fn entries_for_run(&self, run: RunId) -> Vec<&JournalEntry> {
        self.entries.iter().filter(|e| e.run == Some(run)).collect()
    }

    pub fn entries_for_token(&self, token: &Token) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.involves_token(token))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Entries dropped to stay within capacity
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn last(&self) -> Option<&JournalEntry> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procedure_types::StepKind;

    #[test]
    fn test_record_and_query() {
        let mut journal = Journal::new();
        let run = RunId::generate();
        journal.record(Some(run), JournalEvent::Begun);
        journal.record(
            Some(run),
            JournalEvent::StepBegun {
                token: Token::new("s1"),
                kind: StepKind::Marker,
            },
        );
        journal.record(None, JournalEvent::Reset);

        assert_eq!(journal.count(), 3);
        assert_eq!(journal.entries_for_run(run).len(), 2);
        assert_eq!(journal.entries_for_token(&Token::new("s1")).len(), 1);
        assert_eq!(journal.last().unwrap().event, JournalEvent::Reset);

        journal.clear();
        assert_eq!(journal.count(), 0);
    }

    #[test]
    fn test_disabled_journal_drops_events() {
        let mut journal = Journal::disabled();
        journal.record(None, JournalEvent::Begun);
        assert!(!journal.is_enabled());
        assert_eq!(journal.count(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut journal = Journal::with_capacity(3);
        for i in 0..5 {
            journal.record(
                None,
                JournalEvent::StepCompleted {
                    token: Token::new(format!("s{}", i)),
                },
            );
        }

        assert_eq!(journal.count(), 3);
        assert_eq!(journal.evicted(), 2);
        let tokens: Vec<String> = journal
            .entries()
            .map(|e| match &e.event {
                JournalEvent::StepCompleted { token } => token.as_str().to_string(),
                other => panic!("unexpected event {}", other),
            })
            .collect();
        assert_eq!(tokens, vec!["s2", "s3", "s4"]);
    }
}
