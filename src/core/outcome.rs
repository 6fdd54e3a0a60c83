//! Named exit labels of a state.

use super::ids::OutcomeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default success path of execution and library states.
pub const SUCCESS: OutcomeId = 0;
/// Universal error outcome.
pub const ABORTED: OutcomeId = -1;
/// Universal outcome of a state that was preempted or stopped.
pub const PREEMPTED: OutcomeId = -2;

/// A named exit condition of a state. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    id: OutcomeId,
    name: String,
}

impl Outcome {
    pub fn new(id: OutcomeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(SUCCESS, "success")
    }

    pub fn aborted() -> Self {
        Self::new(ABORTED, "aborted")
    }

    pub fn preempted() -> Self {
        Self::new(PREEMPTED, "preempted")
    }

    pub fn id(&self) -> OutcomeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn termination(&self) -> Termination {
        Termination::of(self.id)
    }
}

/// Classification of a terminal outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Termination {
    Success,
    Error,
    Preempted,
}

impl Termination {
    pub fn of(id: OutcomeId) -> Self {
        match id {
            PREEMPTED => Self::Preempted,
            id if id < 0 => Self::Error,
            _ => Self::Success,
        }
    }
}

/// Ids a state may declare: the reserved ones and positive custom ids.
pub fn is_declarable(id: OutcomeId) -> bool {
    id > 0 || matches!(id, SUCCESS | ABORTED | PREEMPTED)
}

/// The outcome set every state starts with.
///
/// Universal outcomes are always present; `with_success` adds the default
/// success path.
pub fn default_outcomes(with_success: bool) -> BTreeMap<OutcomeId, Outcome> {
    let mut outcomes = BTreeMap::new();
    outcomes.insert(ABORTED, Outcome::aborted());
    outcomes.insert(PREEMPTED, Outcome::preempted());
    if with_success {
        outcomes.insert(SUCCESS, Outcome::success());
    }
    outcomes
}
