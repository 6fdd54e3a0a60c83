//! The polymorphic state node of a hierarchy.
//!
//! A state is one of a closed set of variants, distinguished by
//! [`StateKind`]. Containers exclusively own their children; the `parent`
//! field is a non-owning id used only for upward lookups.

use super::elements::{DataFlow, Transition};
use super::error::ModelError;
use super::ids::{DataFlowId, OutcomeId, PortId, StateId, StatePath, TransitionId};
use super::outcome::{default_outcomes, is_declarable, Outcome};
use super::port::{DataPort, PortKind, ScopedVariable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reference to an externally defined state subtree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryRef {
    pub path: String,
    pub name: String,
}

impl LibraryRef {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LibraryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.path, self.name)
    }
}

/// Children and edges owned by a container state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub(crate) children: BTreeMap<StateId, State>,
    pub(crate) transitions: BTreeMap<TransitionId, Transition>,
    pub(crate) data_flows: BTreeMap<DataFlowId, DataFlow>,
    pub(crate) scoped_variables: BTreeMap<PortId, ScopedVariable>,
    pub(crate) start_state: Option<StateId>,
}

impl Container {
    pub fn children(&self) -> &BTreeMap<StateId, State> {
        &self.children
    }

    pub fn child(&self, id: &str) -> Option<&State> {
        self.children.get(id)
    }

    pub fn transitions(&self) -> &BTreeMap<TransitionId, Transition> {
        &self.transitions
    }

    pub fn data_flows(&self) -> &BTreeMap<DataFlowId, DataFlow> {
        &self.data_flows
    }

    pub fn scoped_variables(&self) -> &BTreeMap<PortId, ScopedVariable> {
        &self.scoped_variables
    }

    pub fn start_state(&self) -> Option<&str> {
        self.start_state.as_deref()
    }

    /// The transition leaving `state_id` through `outcome`, if any.
    pub fn transition_for(&self, state_id: &str, outcome: OutcomeId) -> Option<&Transition> {
        self.transitions
            .values()
            .find(|t| t.from_state == state_id && t.from_outcome == outcome)
    }

    /// The data flow targeting the given sink, if any.
    pub fn flow_into(&self, state_id: &str, port: PortId) -> Option<&DataFlow> {
        self.data_flows
            .values()
            .find(|f| f.to_state == state_id && f.to_port == port)
    }

    pub fn next_transition_id(&self) -> TransitionId {
        self.transitions.keys().next_back().map_or(0, |id| id + 1)
    }

    pub fn next_data_flow_id(&self) -> DataFlowId {
        self.data_flows.keys().next_back().map_or(0, |id| id + 1)
    }
}

/// Variant-specific part of a state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StateKind {
    /// Leaf running the named script.
    Execution { script: String },
    /// Runs children one at a time, following transitions from the start state.
    Hierarchy(Container),
    /// Runs all children concurrently and concludes when all have concluded.
    BarrierConcurrency(Container),
    /// Runs all children concurrently and concludes with the first to conclude.
    PreemptiveConcurrency(Container),
    /// Named pointer to an external subtree; `content` holds the private copy once expanded.
    Library {
        reference: LibraryRef,
        content: Option<Box<State>>,
    },
}

/// Discriminant of [`StateKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    Execution,
    Hierarchy,
    BarrierConcurrency,
    PreemptiveConcurrency,
    Library,
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Execution => "execution",
            Self::Hierarchy => "hierarchy",
            Self::BarrierConcurrency => "barrier concurrency",
            Self::PreemptiveConcurrency => "preemptive concurrency",
            Self::Library => "library",
        };
        f.write_str(name)
    }
}

/// A node of the state hierarchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub(crate) id: StateId,
    pub(crate) name: String,
    pub(crate) parent: Option<StateId>,
    pub(crate) input_ports: BTreeMap<PortId, DataPort>,
    pub(crate) output_ports: BTreeMap<PortId, DataPort>,
    pub(crate) outcomes: BTreeMap<OutcomeId, Outcome>,
    pub(crate) kind: StateKind,
}

impl State {
    fn with_kind(id: impl Into<StateId>, name: impl Into<String>, kind: StateKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent: None,
            input_ports: BTreeMap::new(),
            output_ports: BTreeMap::new(),
            outcomes: default_outcomes(true),
            kind,
        }
    }

    /// Leaf state whose unit of work is the script registered under `script`.
    pub fn execution(
        id: impl Into<StateId>,
        name: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            id,
            name,
            StateKind::Execution {
                script: script.into(),
            },
        )
    }

    pub fn hierarchy(id: impl Into<StateId>, name: impl Into<String>) -> Self {
        Self::with_kind(id, name, StateKind::Hierarchy(Container::default()))
    }

    pub fn barrier_concurrency(id: impl Into<StateId>, name: impl Into<String>) -> Self {
        Self::with_kind(id, name, StateKind::BarrierConcurrency(Container::default()))
    }

    pub fn preemptive_concurrency(id: impl Into<StateId>, name: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            name,
            StateKind::PreemptiveConcurrency(Container::default()),
        )
    }

    /// Unexpanded library reference; see [`crate::machine::expand_libraries`].
    pub fn library(id: impl Into<StateId>, name: impl Into<String>, reference: LibraryRef) -> Self {
        Self::with_kind(
            id,
            name,
            StateKind::Library {
                reference,
                content: None,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn kind(&self) -> &StateKind {
        &self.kind
    }

    pub fn state_type(&self) -> StateType {
        match &self.kind {
            StateKind::Execution { .. } => StateType::Execution,
            StateKind::Hierarchy(_) => StateType::Hierarchy,
            StateKind::BarrierConcurrency(_) => StateType::BarrierConcurrency,
            StateKind::PreemptiveConcurrency(_) => StateType::PreemptiveConcurrency,
            StateKind::Library { .. } => StateType::Library,
        }
    }

    pub fn script(&self) -> Option<&str> {
        match &self.kind {
            StateKind::Execution { script } => Some(script),
            _ => None,
        }
    }

    pub fn library_ref(&self) -> Option<&LibraryRef> {
        match &self.kind {
            StateKind::Library { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// Expanded private copy of a library's subtree.
    pub fn library_content(&self) -> Option<&State> {
        match &self.kind {
            StateKind::Library { content, .. } => content.as_deref(),
            _ => None,
        }
    }

    pub fn outcomes(&self) -> &BTreeMap<OutcomeId, Outcome> {
        &self.outcomes
    }

    pub fn outcome(&self, id: OutcomeId) -> Option<&Outcome> {
        self.outcomes.get(&id)
    }

    pub fn input_ports(&self) -> &BTreeMap<PortId, DataPort> {
        &self.input_ports
    }

    pub fn output_ports(&self) -> &BTreeMap<PortId, DataPort> {
        &self.output_ports
    }

    pub fn container(&self) -> Option<&Container> {
        match &self.kind {
            StateKind::Hierarchy(c)
            | StateKind::BarrierConcurrency(c)
            | StateKind::PreemptiveConcurrency(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn container_mut(&mut self) -> Option<&mut Container> {
        match &mut self.kind {
            StateKind::Hierarchy(c)
            | StateKind::BarrierConcurrency(c)
            | StateKind::PreemptiveConcurrency(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        self.container().is_some()
    }

    pub(crate) fn require_container(&self) -> Result<&Container, ModelError> {
        self.container().ok_or_else(|| {
            ModelError::InvalidChild(format!(
                "'{}' is a {} state and has no children",
                self.id,
                self.state_type()
            ))
        })
    }

    pub(crate) fn require_container_mut(&mut self) -> Result<&mut Container, ModelError> {
        let id = self.id.clone();
        let state_type = self.state_type();
        self.container_mut().ok_or_else(|| {
            ModelError::InvalidChild(format!(
                "'{id}' is a {state_type} state and has no children"
            ))
        })
    }

    pub fn child(&self, id: &str) -> Option<&State> {
        self.container().and_then(|c| c.children.get(id))
    }

    /// Look up a port of any kind by id.
    pub fn port(&self, id: PortId) -> Option<(PortKind, &DataPort)> {
        if let Some(port) = self.input_ports.get(&id) {
            return Some((PortKind::Input, port));
        }
        if let Some(port) = self.output_ports.get(&id) {
            return Some((PortKind::Output, port));
        }
        self.container()
            .and_then(|c| c.scoped_variables.get(&id))
            .map(|port| (PortKind::Scoped, port))
    }

    pub fn port_by_name(&self, kind: PortKind, name: &str) -> Option<&DataPort> {
        let ports = match kind {
            PortKind::Input => Some(&self.input_ports),
            PortKind::Output => Some(&self.output_ports),
            PortKind::Scoped => self.container().map(|c| &c.scoped_variables),
        };
        ports.and_then(|ports| ports.values().find(|p| p.name() == name))
    }

    pub(crate) fn ports_mut(&mut self, kind: PortKind) -> Option<&mut BTreeMap<PortId, DataPort>> {
        match kind {
            PortKind::Input => Some(&mut self.input_ports),
            PortKind::Output => Some(&mut self.output_ports),
            PortKind::Scoped => self.container_mut().map(|c| &mut c.scoped_variables),
        }
    }

    /// Smallest port id not used by any port kind of this state.
    pub fn next_port_id(&self) -> PortId {
        let scoped = self
            .container()
            .and_then(|c| c.scoped_variables.keys().next_back().copied());
        [
            self.input_ports.keys().next_back().copied(),
            self.output_ports.keys().next_back().copied(),
            scoped,
        ]
        .into_iter()
        .flatten()
        .max()
        .map_or(0, |id| id + 1)
    }

    /// Smallest positive outcome id not yet used.
    pub fn next_outcome_id(&self) -> OutcomeId {
        self.outcomes
            .keys()
            .next_back()
            .map_or(1, |id| (*id + 1).max(1))
    }

    pub(crate) fn add_outcome(&mut self, outcome: Outcome) -> Result<OutcomeId, ModelError> {
        let id = outcome.id();
        if !is_declarable(id) {
            return Err(ModelError::Validation(format!(
                "outcome {id} of state '{}' must be positive",
                self.id
            )));
        }
        if self.outcomes.contains_key(&id) {
            return Err(ModelError::DuplicateId(format!(
                "outcome {id} of state '{}'",
                self.id
            )));
        }
        self.outcomes.insert(id, outcome);
        Ok(id)
    }

    /// Direct children, including the expanded content of a library.
    pub fn sub_states(&self) -> Vec<&State> {
        match &self.kind {
            StateKind::Library {
                content: Some(content),
                ..
            } => vec![content.as_ref()],
            _ => self
                .container()
                .map(|c| c.children.values().collect())
                .unwrap_or_default(),
        }
    }

    /// True if this state or any state below it carries `id`.
    pub fn contains_id(&self, id: &str) -> bool {
        self.id == id || self.sub_states().iter().any(|s| s.contains_id(id))
    }

    /// Resolve a path whose first segment is this state's id.
    pub fn find(&self, path: &StatePath) -> Option<&State> {
        let (first, rest) = path.ids().split_first()?;
        if *first != self.id {
            return None;
        }
        rest.iter().try_fold(self, |state, id| {
            state.sub_states().into_iter().find(|s| s.id == *id)
        })
    }

    pub(crate) fn find_mut(&mut self, path: &StatePath) -> Option<&mut State> {
        let (first, rest) = path.ids().split_first()?;
        if *first != self.id {
            return None;
        }
        let mut current = self;
        for id in rest {
            current = current.container_mut()?.children.get_mut(id)?;
        }
        Some(current)
    }

    /// Depth-first enumeration of this subtree in stable (id) child order.
    ///
    /// Paths are rooted at `base`, which should be the path of `self`.
    pub fn walk(&self, base: &StatePath) -> Vec<(StatePath, &State)> {
        let mut visited = vec![(base.clone(), self)];
        for child in self.sub_states() {
            visited.extend(child.walk(&base.child(&child.id)));
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::{ABORTED, PREEMPTED, SUCCESS};

    #[test]
    fn new_states_carry_default_outcomes() {
        let state = State::execution("A", "A", "noop");
        assert!(state.outcome(SUCCESS).is_some());
        assert!(state.outcome(ABORTED).is_some());
        assert!(state.outcome(PREEMPTED).is_some());
        assert_eq!(state.next_outcome_id(), 1);
    }

    #[test]
    fn custom_outcomes_must_be_positive() {
        let mut state = State::execution("A", "A", "noop");
        assert!(matches!(
            state.add_outcome(Outcome::new(-3, "odd")),
            Err(ModelError::Validation(_))
        ));
        assert!(matches!(
            state.add_outcome(Outcome::new(ABORTED, "again")),
            Err(ModelError::DuplicateId(_))
        ));
        assert_eq!(state.add_outcome(Outcome::new(2, "retry")), Ok(2));
        assert!(state.outcome(-3).is_none());
    }

    #[test]
    fn execution_states_are_not_containers() {
        let state = State::execution("A", "A", "noop");
        assert!(!state.is_container());
        assert!(state.require_container().is_err());
        assert_eq!(state.script(), Some("noop"));
    }

    #[test]
    fn find_resolves_nested_paths() {
        let mut root = State::hierarchy("ROOT", "root");
        let mut group = State::hierarchy("G", "group");
        group
            .container_mut()
            .unwrap()
            .children
            .insert("L".into(), State::execution("L", "leaf", "noop"));
        root.container_mut()
            .unwrap()
            .children
            .insert("G".into(), group);

        let path: StatePath = "ROOT/G/L".parse().unwrap();
        assert_eq!(root.find(&path).map(State::id), Some("L"));
        assert!(root.find(&"OTHER/G".parse().unwrap()).is_none());
        assert!(root.contains_id("L"));

        let walked: Vec<String> = root
            .walk(&StatePath::root("ROOT"))
            .into_iter()
            .map(|(path, _)| path.to_string())
            .collect();
        assert_eq!(walked, vec!["ROOT", "ROOT/G", "ROOT/G/L"]);
    }

    #[test]
    fn state_serializes_correctly() {
        let state = State::barrier_concurrency("B", "barrier");
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: State = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
