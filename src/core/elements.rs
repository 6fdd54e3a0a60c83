//! Edges of a container: transitions and data flows.

use super::ids::{DataFlowId, OutcomeId, PortId, StateId, TransitionId};
use serde::{Deserialize, Serialize};

/// Maps a child's `(state, outcome)` to the next sibling or to the
/// container's own conclusion.
///
/// `to_outcome` is `Some` exactly when `to_state` is the owning container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub from_state: StateId,
    pub from_outcome: OutcomeId,
    pub to_state: StateId,
    pub to_outcome: Option<OutcomeId>,
}

impl Transition {
    pub fn new(
        id: TransitionId,
        from_state: impl Into<StateId>,
        from_outcome: OutcomeId,
        to_state: impl Into<StateId>,
        to_outcome: Option<OutcomeId>,
    ) -> Self {
        Self {
            id,
            from_state: from_state.into(),
            from_outcome,
            to_state: to_state.into(),
            to_outcome,
        }
    }

    pub fn references(&self, state_id: &str) -> bool {
        self.from_state == state_id || self.to_state == state_id
    }
}

/// Copies a value from a source slot to a sink slot within one container level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlow {
    pub id: DataFlowId,
    pub from_state: StateId,
    pub from_port: PortId,
    pub to_state: StateId,
    pub to_port: PortId,
}

impl DataFlow {
    pub fn new(
        id: DataFlowId,
        from_state: impl Into<StateId>,
        from_port: PortId,
        to_state: impl Into<StateId>,
        to_port: PortId,
    ) -> Self {
        Self {
            id,
            from_state: from_state.into(),
            from_port,
            to_state: to_state.into(),
            to_port,
        }
    }

    pub fn references(&self, state_id: &str) -> bool {
        self.from_state == state_id || self.to_state == state_id
    }

    pub fn touches_port(&self, state_id: &str, port: PortId) -> bool {
        (self.from_state == state_id && self.from_port == port)
            || (self.to_state == state_id && self.to_port == port)
    }
}
