//! Structural editing of a single container.
//!
//! These operations check every invariant of the container they act on and
//! leave it untouched on error. Operations that need the enclosing container
//! (port removal, ancestry checks) live on [`crate::machine::StateMachine`].

use crate::core::{
    DataFlow, DataFlowId, DataPort, DataType, ModelError, OutcomeId, PortId, PortKind, State,
    StateId, StateType, Transition, TransitionId,
};
use serde::{Deserialize, Serialize};

/// A child removed from its container together with every edge that referenced it.
///
/// Holds everything needed to put the child back exactly as it was.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemovedState {
    pub state: State,
    pub transitions: Vec<Transition>,
    pub data_flows: Vec<DataFlow>,
    pub was_start_state: bool,
}

/// Resolved endpoint of a data flow.
struct Endpoint {
    data_type: DataType,
}

impl State {
    /// Add `child` to this container and return its id.
    ///
    /// Fails with [`ModelError::DuplicateId`] if a child with the same id
    /// exists and with [`ModelError::InvalidChild`] if this state is not a
    /// container or the child's subtree contains this state.
    pub fn add_child(&mut self, mut child: State) -> Result<StateId, ModelError> {
        if child.contains_id(&self.id) {
            return Err(ModelError::InvalidChild(format!(
                "'{}' cannot become its own descendant",
                self.id
            )));
        }
        let parent_id = self.id.clone();
        let container = self.require_container_mut()?;
        if container.children.contains_key(&child.id) {
            return Err(ModelError::DuplicateId(format!("state '{}'", child.id)));
        }
        child.parent = Some(parent_id);
        let id = child.id.clone();
        container.children.insert(id.clone(), child);
        Ok(id)
    }

    /// Remove a child, cascading to every transition and data flow that references it.
    pub fn remove_child(&mut self, id: &str) -> Result<RemovedState, ModelError> {
        let container = self.require_container_mut()?;
        let mut state = container
            .children
            .remove(id)
            .ok_or_else(|| ModelError::NotFound(format!("child state '{id}'")))?;
        state.parent = None;

        let transitions: Vec<Transition> = container
            .transitions
            .values()
            .filter(|t| t.references(id))
            .cloned()
            .collect();
        for transition in &transitions {
            container.transitions.remove(&transition.id);
        }

        let data_flows: Vec<DataFlow> = container
            .data_flows
            .values()
            .filter(|f| f.references(id))
            .cloned()
            .collect();
        for flow in &data_flows {
            container.data_flows.remove(&flow.id);
        }

        let was_start_state = container.start_state.as_deref() == Some(id);
        if was_start_state {
            container.start_state = None;
        }

        Ok(RemovedState {
            state,
            transitions,
            data_flows,
            was_start_state,
        })
    }

    /// Put back a child removed by [`State::remove_child`].
    pub fn restore_child(&mut self, removed: RemovedState) -> Result<StateId, ModelError> {
        let id = self.add_child(removed.state)?;
        for transition in removed.transitions {
            self.insert_transition(transition)?;
        }
        for flow in removed.data_flows {
            self.insert_data_flow(flow)?;
        }
        if removed.was_start_state {
            self.set_start_state(Some(id.clone()))?;
        }
        Ok(id)
    }

    /// Add a transition with a fresh id.
    pub fn add_transition(
        &mut self,
        from_state: &str,
        from_outcome: OutcomeId,
        to_state: &str,
        to_outcome: Option<OutcomeId>,
    ) -> Result<TransitionId, ModelError> {
        let id = self.require_container()?.next_transition_id();
        self.insert_transition(Transition::new(
            id,
            from_state,
            from_outcome,
            to_state,
            to_outcome,
        ))
    }

    /// Insert a fully specified transition after checking it against this container.
    pub fn insert_transition(&mut self, transition: Transition) -> Result<TransitionId, ModelError> {
        self.check_transition(&transition)?;
        let container = self.require_container()?;
        if container.transitions.contains_key(&transition.id) {
            return Err(ModelError::DuplicateId(format!(
                "transition {} in '{}'",
                transition.id, self.id
            )));
        }
        if let Some(existing) =
            container.transition_for(&transition.from_state, transition.from_outcome)
        {
            return Err(ModelError::Validation(format!(
                "outcome {} of '{}' is already connected by transition {}",
                transition.from_outcome, transition.from_state, existing.id
            )));
        }
        let id = transition.id;
        self.require_container_mut()?
            .transitions
            .insert(id, transition);
        Ok(id)
    }

    /// Check a transition's endpoints without inserting it.
    pub fn check_transition(&self, transition: &Transition) -> Result<(), ModelError> {
        let container = self.require_container()?;
        let from = container.children.get(&transition.from_state).ok_or_else(|| {
            ModelError::Validation(format!(
                "transition source '{}' is not a child of '{}'",
                transition.from_state, self.id
            ))
        })?;
        if from.outcome(transition.from_outcome).is_none() {
            return Err(ModelError::Validation(format!(
                "state '{}' has no outcome {}",
                transition.from_state, transition.from_outcome
            )));
        }

        if transition.to_state == self.id {
            let outcome = transition.to_outcome.ok_or_else(|| {
                ModelError::Validation(format!(
                    "transition into container '{}' needs a target outcome",
                    self.id
                ))
            })?;
            if self.outcome(outcome).is_none() {
                return Err(ModelError::Validation(format!(
                    "container '{}' has no outcome {outcome}",
                    self.id
                )));
            }
        } else if container.children.contains_key(&transition.to_state) {
            if transition.to_outcome.is_some() {
                return Err(ModelError::Validation(format!(
                    "transition to sibling '{}' cannot carry a target outcome",
                    transition.to_state
                )));
            }
        } else {
            return Err(ModelError::Validation(format!(
                "transition target '{}' is neither '{}' nor one of its children",
                transition.to_state, self.id
            )));
        }
        Ok(())
    }

    pub fn remove_transition(&mut self, id: TransitionId) -> Result<Transition, ModelError> {
        self.require_container_mut()?
            .transitions
            .remove(&id)
            .ok_or_else(|| ModelError::NotFound(format!("transition {id}")))
    }

    /// Add a data flow with a fresh id.
    pub fn add_data_flow(
        &mut self,
        from_state: &str,
        from_port: PortId,
        to_state: &str,
        to_port: PortId,
    ) -> Result<DataFlowId, ModelError> {
        let id = self.require_container()?.next_data_flow_id();
        self.insert_data_flow(DataFlow::new(id, from_state, from_port, to_state, to_port))
    }

    /// Insert a fully specified data flow after checking it against this container.
    pub fn insert_data_flow(&mut self, flow: DataFlow) -> Result<DataFlowId, ModelError> {
        self.check_data_flow(&flow)?;
        let container = self.require_container()?;
        if container.data_flows.contains_key(&flow.id) {
            return Err(ModelError::DuplicateId(format!(
                "data flow {} in '{}'",
                flow.id, self.id
            )));
        }
        if let Some(existing) = container.flow_into(&flow.to_state, flow.to_port) {
            return Err(ModelError::PortBusy {
                state: flow.to_state.clone(),
                port: flow.to_port,
                data_flow: existing.id,
            });
        }
        let id = flow.id;
        self.require_container_mut()?.data_flows.insert(id, flow);
        Ok(id)
    }

    /// Check a data flow's endpoints and types without inserting it.
    pub fn check_data_flow(&self, flow: &DataFlow) -> Result<(), ModelError> {
        let source = self.source_endpoint(&flow.from_state, flow.from_port)?;
        let sink = self.sink_endpoint(&flow.to_state, flow.to_port)?;
        if flow.from_state == flow.to_state && flow.from_port == flow.to_port {
            return Err(ModelError::Validation(format!(
                "data flow {} connects port {} of '{}' to itself",
                flow.id, flow.from_port, flow.from_state
            )));
        }
        if !source.data_type.is_assignable_to(sink.data_type) {
            return Err(ModelError::TypeMismatch {
                from: source.data_type,
                to: sink.data_type,
            });
        }
        Ok(())
    }

    fn source_endpoint(&self, state_id: &str, port: PortId) -> Result<Endpoint, ModelError> {
        let container = self.require_container()?;
        let found = if state_id == self.id {
            match self.port(port) {
                Some((PortKind::Input | PortKind::Scoped, p)) => Some(p),
                _ => None,
            }
        } else {
            container
                .children
                .get(state_id)
                .and_then(|child| child.output_ports.get(&port))
        };
        found
            .map(|p| Endpoint {
                data_type: p.data_type(),
            })
            .ok_or_else(|| {
                ModelError::Validation(format!(
                    "'{state_id}' has no data source {port} visible inside '{}'",
                    self.id
                ))
            })
    }

    fn sink_endpoint(&self, state_id: &str, port: PortId) -> Result<Endpoint, ModelError> {
        let container = self.require_container()?;
        let found = if state_id == self.id {
            match self.port(port) {
                Some((PortKind::Output | PortKind::Scoped, p)) => Some(p),
                _ => None,
            }
        } else {
            container
                .children
                .get(state_id)
                .and_then(|child| child.input_ports.get(&port))
        };
        found
            .map(|p| Endpoint {
                data_type: p.data_type(),
            })
            .ok_or_else(|| {
                ModelError::Validation(format!(
                    "'{state_id}' has no data sink {port} visible inside '{}'",
                    self.id
                ))
            })
    }

    pub fn remove_data_flow(&mut self, id: DataFlowId) -> Result<DataFlow, ModelError> {
        self.require_container_mut()?
            .data_flows
            .remove(&id)
            .ok_or_else(|| ModelError::NotFound(format!("data flow {id}")))
    }

    /// Remove and return every data flow of this container touching the given slot.
    pub fn remove_flows_touching(&mut self, state_id: &str, port: PortId) -> Vec<DataFlow> {
        let Some(container) = self.container_mut() else {
            return Vec::new();
        };
        let removed: Vec<DataFlow> = container
            .data_flows
            .values()
            .filter(|f| f.touches_port(state_id, port))
            .cloned()
            .collect();
        for flow in &removed {
            container.data_flows.remove(&flow.id);
        }
        removed
    }

    /// Choose the child a hierarchy container starts with.
    pub fn set_start_state(&mut self, id: Option<StateId>) -> Result<(), ModelError> {
        if self.state_type() != StateType::Hierarchy {
            return Err(ModelError::Validation(format!(
                "only hierarchy states have a start state, '{}' is a {} state",
                self.id,
                self.state_type()
            )));
        }
        let container = self.require_container_mut()?;
        if let Some(id) = &id {
            if !container.children.contains_key(id) {
                return Err(ModelError::NotFound(format!("child state '{id}'")));
            }
        }
        container.start_state = id;
        Ok(())
    }

    /// Attach a port of the given kind. Names are unique per kind, ids per state.
    pub fn add_port(&mut self, kind: PortKind, port: DataPort) -> Result<PortId, ModelError> {
        if self.port(port.id()).is_some() {
            return Err(ModelError::DuplicateId(format!(
                "port {} of state '{}'",
                port.id(),
                self.id
            )));
        }
        if self.port_by_name(kind, port.name()).is_some() {
            return Err(ModelError::Validation(format!(
                "state '{}' already has a {kind:?} port named '{}'",
                self.id,
                port.name()
            )));
        }
        let id = port.id();
        let state_id = self.id.clone();
        self.ports_mut(kind)
            .ok_or_else(|| {
                ModelError::InvalidChild(format!(
                    "'{state_id}' cannot own scoped variables"
                ))
            })?
            .insert(id, port);
        Ok(id)
    }

    /// Detach a port. Data flows referencing it must be removed by the caller.
    pub fn take_port(&mut self, id: PortId) -> Result<(PortKind, DataPort), ModelError> {
        let kind = self
            .port(id)
            .map(|(kind, _)| kind)
            .ok_or_else(|| ModelError::NotFound(format!("port {id} of state '{}'", self.id)))?;
        self.ports_mut(kind)
            .and_then(|ports| ports.remove(&id))
            .map(|port| (kind, port))
            .ok_or_else(|| ModelError::NotFound(format!("port {id} of state '{}'", self.id)))
    }

    pub(crate) fn port_mut(&mut self, id: PortId) -> Result<&mut DataPort, ModelError> {
        let state_id = self.id.clone();
        let kind = self
            .port(id)
            .map(|(kind, _)| kind)
            .ok_or_else(|| ModelError::NotFound(format!("port {id} of state '{state_id}'")))?;
        self.ports_mut(kind)
            .and_then(|ports| ports.get_mut(&id))
            .ok_or_else(|| ModelError::NotFound(format!("port {id} of state '{state_id}'")))
    }

    pub(crate) fn child_mut(&mut self, id: &str) -> Result<&mut State, ModelError> {
        self.require_container_mut()?
            .children
            .get_mut(id)
            .ok_or_else(|| ModelError::NotFound(format!("child state '{id}'")))
    }
}
