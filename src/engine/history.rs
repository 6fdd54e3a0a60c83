//! What happened during a run: per-state status, the ordered trail of state
//! entries and exits, and the final report.

use crate::core::{OutcomeId, StatePath, Termination, Value};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Lifecycle of a single state instance: `Idle -> Active -> terminal -> Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateStatus {
    #[default]
    Idle,
    Active,
    Succeeded,
    Failed,
    Preempted,
}

impl StateStatus {
    pub fn from_outcome(outcome: OutcomeId) -> Self {
        match Termination::of(outcome) {
            Termination::Success => Self::Succeeded,
            Termination::Error => Self::Failed,
            Termination::Preempted => Self::Preempted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Preempted)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
    Enter,
    Exit { outcome: OutcomeId },
}

/// One entry or exit of a state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub path: StatePath,
    pub event: ExecutionEvent,
    pub timestamp: DateTime<Utc>,
}

/// Ordered, timestamped trail of state entries and exits.
///
/// # Example
///
/// ```rust
/// use statecraft::core::{StatePath, SUCCESS};
/// use statecraft::engine::{ExecutionEvent, ExecutionHistory};
///
/// let mut history = ExecutionHistory::new();
/// let root = StatePath::root("ROOT");
/// history.push(root.clone(), ExecutionEvent::Enter);
/// history.push(root.child("A"), ExecutionEvent::Enter);
/// history.push(root.child("A"), ExecutionEvent::Exit { outcome: SUCCESS });
///
/// assert_eq!(history.path(), vec![&root, &root.child("A")]);
/// assert!(history.duration().is_some());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    records: Vec<ExecutionRecord>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: StatePath, event: ExecutionEvent) {
        self.records.push(ExecutionRecord {
            path,
            event,
            timestamp: Utc::now(),
        });
    }

    /// States in the order they were entered.
    pub fn path(&self) -> Vec<&StatePath> {
        self.records
            .iter()
            .filter(|r| r.event == ExecutionEvent::Enter)
            .map(|r| &r.path)
            .collect()
    }

    /// Time between the first and the last record.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.records.first(), self.records.last()) {
            last.timestamp
                .signed_duration_since(first.timestamp)
                .to_std()
                .ok()
        } else {
            None
        }
    }

    /// Rewrite the outcome of the last exit recorded for `path`.
    pub(crate) fn amend_exit(&mut self, path: &StatePath, outcome: OutcomeId) {
        let last_exit = self.records.iter_mut().rev().find(|r| {
            r.path == *path && matches!(r.event, ExecutionEvent::Exit { .. })
        });
        if let Some(record) = last_exit {
            record.event = ExecutionEvent::Exit { outcome };
        }
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Final result of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Outcome of the root state.
    pub final_outcome: OutcomeId,
    /// Values of the root's output ports.
    pub outputs: BTreeMap<String, Value>,
    /// Last outcome of every state that concluded during the run.
    pub outcomes: BTreeMap<StatePath, OutcomeId>,
    /// Leaf faults, missing transitions and other problems met on the way.
    pub diagnostics: Vec<String>,
    pub history: ExecutionHistory,
}

impl RunReport {
    pub fn termination(&self) -> Termination {
        Termination::of(self.final_outcome)
    }

    pub fn outcome_of(&self, path: &StatePath) -> Option<OutcomeId> {
        self.outcomes.get(path).copied()
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    statuses: BTreeMap<StatePath, StateStatus>,
    outcomes: BTreeMap<StatePath, OutcomeId>,
    diagnostics: Vec<String>,
    history: ExecutionHistory,
}

/// Live view of a run shared between the runner threads and the handle.
#[derive(Debug)]
pub(crate) struct Monitor {
    state: Mutex<MonitorState>,
    record_history: bool,
}

impl Monitor {
    pub(crate) fn new(record_history: bool) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            record_history,
        }
    }

    pub(crate) fn enter(&self, path: &StatePath) {
        let mut state = self.state.lock();
        state.statuses.insert(path.clone(), StateStatus::Active);
        if self.record_history {
            state.history.push(path.clone(), ExecutionEvent::Enter);
        }
    }

    pub(crate) fn exit(&self, path: &StatePath, outcome: OutcomeId) {
        let mut state = self.state.lock();
        state
            .statuses
            .insert(path.clone(), StateStatus::from_outcome(outcome));
        state.outcomes.insert(path.clone(), outcome);
        if self.record_history {
            state.history.push(path.clone(), ExecutionEvent::Exit { outcome });
        }
    }

    /// Overwrite the recorded outcome of a state that lost a preemption race.
    pub(crate) fn preempted(&self, path: &StatePath, outcome: OutcomeId) {
        let mut state = self.state.lock();
        state.statuses.insert(path.clone(), StateStatus::Preempted);
        state.outcomes.insert(path.clone(), outcome);
        state.history.amend_exit(path, outcome);
    }

    /// Return every state strictly below `path` to `Idle`.
    pub(crate) fn reset_below(&self, path: &StatePath) {
        let mut state = self.state.lock();
        for (candidate, status) in state.statuses.iter_mut() {
            if path.is_ancestor_of(candidate) {
                *status = StateStatus::Idle;
            }
        }
    }

    pub(crate) fn diagnose(&self, message: String) {
        self.state.lock().diagnostics.push(message);
    }

    pub(crate) fn status(&self, path: &StatePath) -> StateStatus {
        self.state
            .lock()
            .statuses
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn report(&self, final_outcome: OutcomeId, outputs: BTreeMap<String, Value>) -> RunReport {
        let state = self.state.lock();
        RunReport {
            final_outcome,
            outputs,
            outcomes: state.outcomes.clone(),
            diagnostics: state.diagnostics.clone(),
            history: state.history.clone(),
        }
    }
}
