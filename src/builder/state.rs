//! Fluent construction of state trees.

use crate::builder::error::BuildError;
use crate::core::{
    DataPort, DataType, Outcome, OutcomeId, PortId, PortKind, State, StateId, StateType, Value,
};

#[derive(Clone, Debug)]
struct PortSpec {
    kind: PortKind,
    name: String,
    data_type: DataType,
    default_value: Value,
}

#[derive(Clone, Debug)]
enum ChildSpec {
    Built(State),
    Pending(StateBuilder),
}

#[derive(Clone, Debug)]
struct FlowSpec {
    from_state: StateId,
    from_port: String,
    to_state: StateId,
    to_port: String,
}

/// Builder for a state and, for containers, its whole subtree.
///
/// Ports and data flows are declared by name; ids are assigned on
/// [`build`](Self::build), which applies every declaration through the same
/// checked editing methods a live tree uses.
#[derive(Clone, Debug)]
pub struct StateBuilder {
    seed: State,
    ports: Vec<PortSpec>,
    outcomes: Vec<(OutcomeId, String)>,
    children: Vec<ChildSpec>,
    start: Option<StateId>,
    transitions: Vec<(StateId, OutcomeId, StateId, Option<OutcomeId>)>,
    flows: Vec<FlowSpec>,
}

impl StateBuilder {
    fn with_seed(seed: State) -> Self {
        Self {
            seed,
            ports: Vec::new(),
            outcomes: Vec::new(),
            children: Vec::new(),
            start: None,
            transitions: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Leaf running the script registered under `script`. The name defaults to the id.
    pub fn execution(id: impl Into<StateId>, script: impl Into<String>) -> Self {
        let id = id.into();
        Self::with_seed(State::execution(id.clone(), id, script))
    }

    pub fn hierarchy(id: impl Into<StateId>) -> Self {
        let id = id.into();
        Self::with_seed(State::hierarchy(id.clone(), id))
    }

    pub fn barrier(id: impl Into<StateId>) -> Self {
        let id = id.into();
        Self::with_seed(State::barrier_concurrency(id.clone(), id))
    }

    pub fn preemptive(id: impl Into<StateId>) -> Self {
        let id = id.into();
        Self::with_seed(State::preemptive_concurrency(id.clone(), id))
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.seed.name = name.into();
        self
    }

    fn port(
        mut self,
        kind: PortKind,
        name: &str,
        data_type: DataType,
        default_value: impl Into<Value>,
    ) -> Self {
        self.ports.push(PortSpec {
            kind,
            name: name.to_string(),
            data_type,
            default_value: default_value.into(),
        });
        self
    }

    pub fn input(self, name: &str, data_type: DataType, default_value: impl Into<Value>) -> Self {
        self.port(PortKind::Input, name, data_type, default_value)
    }

    pub fn output(self, name: &str, data_type: DataType, default_value: impl Into<Value>) -> Self {
        self.port(PortKind::Output, name, data_type, default_value)
    }

    pub fn scoped(self, name: &str, data_type: DataType, default_value: impl Into<Value>) -> Self {
        self.port(PortKind::Scoped, name, data_type, default_value)
    }

    /// Add a custom outcome. Ids must be positive.
    pub fn outcome(mut self, id: OutcomeId, name: impl Into<String>) -> Self {
        self.outcomes.push((id, name.into()));
        self
    }

    pub fn child(mut self, child: StateBuilder) -> Self {
        self.children.push(ChildSpec::Pending(child));
        self
    }

    /// Add an already built state as a child.
    pub fn state(mut self, child: State) -> Self {
        self.children.push(ChildSpec::Built(child));
        self
    }

    pub fn start(mut self, id: impl Into<StateId>) -> Self {
        self.start = Some(id.into());
        self
    }

    /// Continue with `to` when `from` concludes with `outcome`.
    pub fn transition(mut self, from: &str, outcome: OutcomeId, to: &str) -> Self {
        self.transitions
            .push((from.to_string(), outcome, to.to_string(), None));
        self
    }

    /// Conclude this container with `container_outcome` when `from` concludes with `outcome`.
    pub fn conclude(mut self, from: &str, outcome: OutcomeId, container_outcome: OutcomeId) -> Self {
        let own = self.seed.id.clone();
        self.transitions
            .push((from.to_string(), outcome, own, Some(container_outcome)));
        self
    }

    /// Connect two ports by name. Use this container's id for its own ports
    /// and scoped variables.
    pub fn flow(mut self, from_state: &str, from_port: &str, to_state: &str, to_port: &str) -> Self {
        self.flows.push(FlowSpec {
            from_state: from_state.to_string(),
            from_port: from_port.to_string(),
            to_state: to_state.to_string(),
            to_port: to_port.to_string(),
        });
        self
    }

    pub fn build(self) -> Result<State, BuildError> {
        let mut state = self.seed;
        let is_leaf = state.state_type() == StateType::Execution;
        if is_leaf
            && !(self.children.is_empty()
                && self.transitions.is_empty()
                && self.flows.is_empty()
                && self.ports.iter().all(|p| p.kind != PortKind::Scoped))
        {
            return Err(BuildError::NotAContainer(state.id.clone()));
        }

        for spec in self.ports {
            let port = DataPort::new(
                state.next_port_id(),
                spec.name,
                spec.data_type,
                spec.default_value,
            )?;
            state.add_port(spec.kind, port)?;
        }
        for (id, name) in self.outcomes {
            state.add_outcome(Outcome::new(id, name))?;
        }
        for child in self.children {
            let child = match child {
                ChildSpec::Built(child) => child,
                ChildSpec::Pending(builder) => builder.build()?,
            };
            state.add_child(child)?;
        }

        let has_children = state
            .container()
            .is_some_and(|c| !c.children().is_empty());
        match self.start {
            Some(start) => state.set_start_state(Some(start))?,
            None if has_children && state.state_type() == StateType::Hierarchy => {
                return Err(BuildError::MissingStartState(state.id.clone()))
            }
            None => {}
        }

        for (from, outcome, to, to_outcome) in self.transitions {
            state.add_transition(&from, outcome, &to, to_outcome)?;
        }
        for flow in self.flows {
            let from_port = source_port(&state, &flow.from_state, &flow.from_port)?;
            let to_port = sink_port(&state, &flow.to_state, &flow.to_port)?;
            state.add_data_flow(&flow.from_state, from_port, &flow.to_state, to_port)?;
        }
        Ok(state)
    }
}

fn named_port(
    owner: &State,
    state_id: &str,
    name: &str,
    own_kinds: [PortKind; 2],
    child_kind: PortKind,
    end: &'static str,
) -> Result<PortId, BuildError> {
    let found = if state_id == owner.id() {
        own_kinds
            .iter()
            .find_map(|kind| owner.port_by_name(*kind, name))
    } else {
        owner
            .child(state_id)
            .and_then(|child| child.port_by_name(child_kind, name))
    };
    found.map(DataPort::id).ok_or_else(|| BuildError::UnknownPort {
        state: state_id.to_string(),
        port: name.to_string(),
        end,
    })
}

fn source_port(owner: &State, state_id: &str, name: &str) -> Result<PortId, BuildError> {
    named_port(
        owner,
        state_id,
        name,
        [PortKind::Input, PortKind::Scoped],
        PortKind::Output,
        "source",
    )
}

fn sink_port(owner: &State, state_id: &str, name: &str) -> Result<PortId, BuildError> {
    named_port(
        owner,
        state_id,
        name,
        [PortKind::Output, PortKind::Scoped],
        PortKind::Input,
        "sink",
    )
}
