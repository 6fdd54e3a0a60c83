//! Linear undo/redo trail.

use super::action::Action;
use crate::core::{ModelError, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One recorded mutation: the action that was applied and the one that reverts it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub method: String,
    pub redo: Action,
    pub undo: Action,
}

/// Linear trail of structural mutations with a movable pointer.
///
/// Entries before the pointer are applied, entries at or after it have been
/// undone and can be redone until a new mutation truncates them.
///
/// # Example
///
/// ```rust
/// use statecraft::core::{State, StatePath};
/// use statecraft::history::{Action, HistoryLog};
///
/// let mut root = State::hierarchy("ROOT", "root");
/// let mut log = HistoryLog::new();
///
/// let action = Action::AddState {
///     container: StatePath::root("ROOT"),
///     state: State::execution("A", "a", "noop"),
/// };
/// let inverse = action.apply(&mut root).unwrap();
/// log.record(action, inverse);
///
/// assert!(log.undo(&mut root).unwrap());
/// assert!(root.child("A").is_none());
/// assert!(log.redo(&mut root).unwrap());
/// assert!(root.child("A").is_some());
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    pointer: usize,
    next_sequence: u64,
    replaying: bool,
    limit: Option<usize>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trail that keeps at most `limit` entries, dropping the oldest first.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Append an applied action and its inverse.
    ///
    /// Truncates any undone entries. Returns the entry's sequence number, or
    /// `None` when the log is replaying and records nothing.
    pub fn record(&mut self, redo: Action, undo: Action) -> Option<u64> {
        if self.replaying {
            return None;
        }
        self.entries.truncate(self.pointer);

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(
            sequence,
            method = redo.method_name(),
            target = %redo.target(),
            "recorded history entry"
        );
        self.entries.push(HistoryEntry {
            sequence,
            timestamp: Utc::now(),
            target: redo.target(),
            method: redo.method_name().to_string(),
            redo,
            undo,
        });

        if let Some(limit) = self.limit {
            let excess = self.entries.len().saturating_sub(limit);
            self.entries.drain(..excess);
        }
        self.pointer = self.entries.len();
        Some(sequence)
    }

    /// Revert the entry before the pointer. Returns `false` if there is nothing to undo.
    pub fn undo(&mut self, root: &mut State) -> Result<bool, ModelError> {
        if self.pointer == 0 {
            warn!("nothing to undo, history is at its start");
            return Ok(false);
        }
        let index = self.pointer - 1;
        let redo = self.replay(root, |entry| &entry.undo, index)?;
        self.entries[index].redo = redo;
        self.pointer = index;
        Ok(true)
    }

    /// Re-apply the entry at the pointer. Returns `false` if there is nothing to redo.
    pub fn redo(&mut self, root: &mut State) -> Result<bool, ModelError> {
        if self.pointer == self.entries.len() {
            warn!("nothing to redo, history is at its end");
            return Ok(false);
        }
        let index = self.pointer;
        let undo = self.replay(root, |entry| &entry.redo, index)?;
        self.entries[index].undo = undo;
        self.pointer = index + 1;
        Ok(true)
    }

    fn replay(
        &mut self,
        root: &mut State,
        pick: impl Fn(&HistoryEntry) -> &Action,
        index: usize,
    ) -> Result<Action, ModelError> {
        let action = pick(&self.entries[index]).clone();
        debug!(
            sequence = self.entries[index].sequence,
            method = action.method_name(),
            "replaying history entry"
        );
        self.with_replay(|| action.apply(root))
    }

    /// Run `f` with recording suppressed, restoring the previous mode afterwards.
    pub fn with_replay<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let previous = std::mem::replace(&mut self.replaying, true);
        let result = f();
        self.replaying = previous;
        result
    }

    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn can_undo(&self) -> bool {
        self.pointer > 0
    }

    pub fn can_redo(&self) -> bool {
        self.pointer < self.entries.len()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StatePath;

    fn add(root: &mut State, log: &mut HistoryLog, id: &str) {
        let action = Action::AddState {
            container: StatePath::root("ROOT"),
            state: State::execution(id, id, "noop"),
        };
        let inverse = action.apply(root).unwrap();
        log.record(action, inverse);
    }

    #[test]
    fn undo_at_start_is_a_no_op() {
        let mut root = State::hierarchy("ROOT", "root");
        let mut log = HistoryLog::new();
        assert!(!log.undo(&mut root).unwrap());
        assert!(!log.redo(&mut root).unwrap());
    }

    #[test]
    fn new_entry_truncates_forward_history() {
        let mut root = State::hierarchy("ROOT", "root");
        let mut log = HistoryLog::new();
        add(&mut root, &mut log, "A");
        add(&mut root, &mut log, "B");
        log.undo(&mut root).unwrap();
        assert!(log.can_redo());

        add(&mut root, &mut log, "C");
        assert_eq!(log.len(), 2);
        assert!(!log.can_redo());
        assert_eq!(log.entries()[1].target, "ROOT/C");
        assert!(root.child("B").is_none());
    }

    #[test]
    fn replay_mode_records_nothing() {
        let mut root = State::hierarchy("ROOT", "root");
        let mut log = HistoryLog::new();
        log.set_replaying(true);
        add(&mut root, &mut log, "A");
        assert!(log.is_empty());
        log.set_replaying(false);

        let recorded = log.with_replay(|| root.child("A").is_some());
        assert!(recorded);
        assert!(!log.is_replaying());
    }

    #[test]
    fn limit_drops_oldest_entries() {
        let mut root = State::hierarchy("ROOT", "root");
        let mut log = HistoryLog::with_limit(Some(2));
        for id in ["A", "B", "C"] {
            add(&mut root, &mut log, id);
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.pointer(), 2);
        assert_eq!(log.entries()[0].sequence, 1);
    }

    #[test]
    fn undo_redo_round_trip() {
        let mut root = State::hierarchy("ROOT", "root");
        let mut log = HistoryLog::new();
        add(&mut root, &mut log, "A");
        add(&mut root, &mut log, "B");
        let full = root.clone();

        while log.undo(&mut root).unwrap() {}
        assert_eq!(root, State::hierarchy("ROOT", "root"));
        while log.redo(&mut root).unwrap() {}
        assert_eq!(root, full);
    }
}
