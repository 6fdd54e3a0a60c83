//! Grouping and ungrouping of sibling states.
//!
//! Both operations are planned against an immutable tree and returned as one
//! [`Action::Batch`], so they apply atomically and undo as a single step.
//! Every transition and data flow crossing the moved boundary is split into an
//! inner and an outer part (grouping) or composed back into one edge
//! (ungrouping).

use crate::core::{
    generate_state_id, DataFlow, DataPort, ModelError, Outcome, OutcomeId, PortId, PortKind,
    State, StateId, StatePath, StateType, Transition, Value,
};
use crate::history::Action;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// A planned composite edit.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupPlan {
    /// The batch to apply.
    pub action: Action,
    /// The new group's id when grouping, the promoted children when ungrouping.
    pub state_ids: Vec<StateId>,
}

fn find<'a>(root: &'a State, path: &StatePath) -> Result<&'a State, ModelError> {
    root.find(path)
        .ok_or_else(|| ModelError::NotFound(format!("state '{path}'")))
}

fn fresh_state_id(root: &State) -> StateId {
    loop {
        let id = generate_state_id();
        if !root.contains_id(&id) {
            return id;
        }
    }
}

fn unique_name<'a>(base: &str, taken: impl IntoIterator<Item = &'a str>) -> String {
    let taken: BTreeSet<&str> = taken.into_iter().collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

/// Type and name of a data source visible inside `container`.
fn source_port<'a>(container: &'a State, state_id: &str, port: PortId) -> Option<&'a DataPort> {
    if state_id == container.id() {
        container
            .port(port)
            .filter(|(kind, _)| *kind != PortKind::Output)
            .map(|(_, p)| p)
    } else {
        container
            .child(state_id)
            .and_then(|child| child.output_ports().get(&port))
    }
}

/// Plan wrapping `state_ids` and `scoped_variable_ids` of the hierarchy at
/// `container` into a new hierarchy state.
///
/// All transitions entering the group must target the same member, which
/// becomes the group's start state.
pub fn plan_group(
    root: &State,
    container: &StatePath,
    state_ids: &[StateId],
    scoped_variable_ids: &[PortId],
) -> Result<GroupPlan, ModelError> {
    let owner = find(root, container)?;
    if owner.state_type() != StateType::Hierarchy {
        return Err(ModelError::Validation(format!(
            "states can only be grouped inside hierarchy states, '{container}' is a {} state",
            owner.state_type()
        )));
    }
    let scope = owner.require_container()?;
    if state_ids.is_empty() {
        return Err(ModelError::Validation("nothing to group".into()));
    }

    let members: BTreeSet<&str> = state_ids.iter().map(String::as_str).collect();
    if members.len() != state_ids.len() {
        return Err(ModelError::Validation("a state is listed twice for grouping".into()));
    }
    let moved_variables: BTreeSet<PortId> = scoped_variable_ids.iter().copied().collect();

    let group_id = fresh_state_id(root);
    let mut group = State::hierarchy(group_id.clone(), "group");
    for id in state_ids {
        let child = scope
            .child(id)
            .ok_or_else(|| ModelError::NotFound(format!("child state '{id}' of '{container}'")))?;
        group.add_child(child.clone())?;
    }
    for id in &moved_variables {
        let variable = scope
            .scoped_variables()
            .get(id)
            .ok_or_else(|| ModelError::NotFound(format!("scoped variable {id} of '{container}'")))?;
        group.add_port(PortKind::Scoped, variable.clone())?;
    }

    let start_moves = scope
        .start_state()
        .is_some_and(|start| members.contains(start));
    let mut entry = scope.start_state().filter(|start| members.contains(start));

    let mut removed_transitions = Vec::new();
    let mut outer_transitions = Vec::new();
    let mut exits: BTreeMap<(StateId, Option<OutcomeId>), OutcomeId> = BTreeMap::new();

    for transition in scope.transitions().values() {
        let from_inside = members.contains(transition.from_state.as_str());
        let to_inside = members.contains(transition.to_state.as_str());
        match (from_inside, to_inside) {
            (true, true) => {
                group.add_transition(
                    &transition.from_state,
                    transition.from_outcome,
                    &transition.to_state,
                    None,
                )?;
            }
            (true, false) => {
                let key = (transition.to_state.clone(), transition.to_outcome);
                let outcome = match exits.get(&key) {
                    Some(outcome) => *outcome,
                    None => {
                        let base = if transition.to_state == owner.id() {
                            transition
                                .to_outcome
                                .and_then(|o| owner.outcome(o))
                                .map_or_else(|| "exit".to_string(), |o| o.name().to_string())
                        } else {
                            let target = scope
                                .child(&transition.to_state)
                                .map_or(transition.to_state.as_str(), State::name);
                            format!("to_{target}")
                        };
                        let name =
                            unique_name(&base, group.outcomes().values().map(Outcome::name));
                        let id = group.add_outcome(Outcome::new(group.next_outcome_id(), name))?;
                        exits.insert(key, id);
                        id
                    }
                };
                group.add_transition(
                    &transition.from_state,
                    transition.from_outcome,
                    &group_id,
                    Some(outcome),
                )?;
            }
            (false, true) => {
                match entry {
                    None => entry = Some(transition.to_state.as_str()),
                    Some(current) if current == transition.to_state => {}
                    Some(current) => {
                        return Err(ModelError::Validation(format!(
                            "grouped states are entered both through '{current}' and '{}'",
                            transition.to_state
                        )))
                    }
                }
                outer_transitions.push((
                    transition.from_state.clone(),
                    transition.from_outcome,
                    group_id.clone(),
                    None,
                ));
            }
            (false, false) => continue,
        }
        removed_transitions.push(transition.id);
    }
    for ((to_state, to_outcome), outcome) in &exits {
        outer_transitions.push((group_id.clone(), *outcome, to_state.clone(), *to_outcome));
    }
    let group_start = entry.unwrap_or(state_ids[0].as_str()).to_string();
    group.set_start_state(Some(group_start))?;

    let is_inside = |state_id: &str, port: PortId| {
        members.contains(state_id) || (state_id == owner.id() && moved_variables.contains(&port))
    };
    let translate = |state_id: &str| {
        if state_id == owner.id() {
            group_id.clone()
        } else {
            state_id.to_string()
        }
    };

    let mut removed_flows = Vec::new();
    let mut outer_flows: Vec<(StateId, PortId, StateId, PortId)> = Vec::new();
    let mut inputs: BTreeMap<(StateId, PortId), PortId> = BTreeMap::new();
    let mut outputs: BTreeMap<(StateId, PortId), PortId> = BTreeMap::new();

    for flow in scope.data_flows().values() {
        let from_inside = is_inside(&flow.from_state, flow.from_port);
        let to_inside = is_inside(&flow.to_state, flow.to_port);
        match (from_inside, to_inside) {
            (true, true) => {
                group.add_data_flow(
                    &translate(&flow.from_state),
                    flow.from_port,
                    &translate(&flow.to_state),
                    flow.to_port,
                )?;
            }
            (false, true) => {
                let key = (flow.from_state.clone(), flow.from_port);
                let port = match inputs.get(&key) {
                    Some(port) => *port,
                    None => {
                        let source = source_port(owner, &flow.from_state, flow.from_port)
                            .ok_or_else(|| {
                                ModelError::NotFound(format!(
                                    "data source {} of '{}'",
                                    flow.from_port, flow.from_state
                                ))
                            })?;
                        let name = unique_name(
                            source.name(),
                            group.input_ports().values().map(DataPort::name),
                        );
                        let port = DataPort::new(
                            group.next_port_id(),
                            name,
                            source.data_type(),
                            source.default_value().clone(),
                        )?
                        .shared(source.by_reference());
                        let id = group.add_port(PortKind::Input, port)?;
                        outer_flows.push((flow.from_state.clone(), flow.from_port, group_id.clone(), id));
                        inputs.insert(key, id);
                        id
                    }
                };
                group.add_data_flow(&group_id, port, &translate(&flow.to_state), flow.to_port)?;
            }
            (true, false) => {
                let key = (flow.from_state.clone(), flow.from_port);
                let port = match outputs.get(&key) {
                    Some(port) => *port,
                    None => {
                        let source = source_port(owner, &flow.from_state, flow.from_port)
                            .ok_or_else(|| {
                                ModelError::NotFound(format!(
                                    "data source {} of '{}'",
                                    flow.from_port, flow.from_state
                                ))
                            })?;
                        let name = unique_name(
                            source.name(),
                            group.output_ports().values().map(DataPort::name),
                        );
                        let port = DataPort::new(
                            group.next_port_id(),
                            name,
                            source.data_type(),
                            Value::Null,
                        )?
                        .shared(source.by_reference());
                        let id = group.add_port(PortKind::Output, port)?;
                        group.add_data_flow(&translate(&flow.from_state), flow.from_port, &group_id, id)?;
                        outputs.insert(key, id);
                        id
                    }
                };
                outer_flows.push((group_id.clone(), port, flow.to_state.clone(), flow.to_port));
            }
            (false, false) => continue,
        }
        removed_flows.push(flow.id);
    }

    let mut actions = Vec::new();
    if start_moves {
        actions.push(Action::SetStartState {
            container: container.clone(),
            state_id: None,
        });
    }
    actions.extend(removed_transitions.into_iter().map(|transition_id| {
        Action::RemoveTransition {
            container: container.clone(),
            transition_id,
        }
    }));
    actions.extend(removed_flows.into_iter().map(|data_flow_id| Action::RemoveDataFlow {
        container: container.clone(),
        data_flow_id,
    }));
    actions.extend(state_ids.iter().map(|state_id| Action::RemoveState {
        container: container.clone(),
        state_id: state_id.clone(),
    }));
    actions.extend(moved_variables.iter().map(|port_id| Action::RemovePort {
        state: container.clone(),
        port_id: *port_id,
    }));
    actions.push(Action::AddState {
        container: container.clone(),
        state: group,
    });

    let first_transition = scope.next_transition_id();
    for (offset, (from_state, from_outcome, to_state, to_outcome)) in
        outer_transitions.into_iter().enumerate()
    {
        actions.push(Action::AddTransition {
            container: container.clone(),
            transition: Transition::new(
                first_transition + offset as u32,
                from_state,
                from_outcome,
                to_state,
                to_outcome,
            ),
        });
    }
    let first_flow = scope.next_data_flow_id();
    for (offset, (from_state, from_port, to_state, to_port)) in outer_flows.into_iter().enumerate() {
        actions.push(Action::AddDataFlow {
            container: container.clone(),
            data_flow: DataFlow::new(first_flow + offset as u32, from_state, from_port, to_state, to_port),
        });
    }
    if start_moves {
        actions.push(Action::SetStartState {
            container: container.clone(),
            state_id: Some(group_id.clone()),
        });
    }

    Ok(GroupPlan {
        action: Action::Batch {
            label: format!("group_states {container}/{group_id}"),
            actions,
        },
        state_ids: vec![group_id],
    })
}

/// Plan dissolving the hierarchy state at `path` into its parent.
///
/// Edges crossing the dissolved boundary are composed; those that cannot be
/// composed are dropped with a warning.
pub fn plan_ungroup(root: &State, path: &StatePath) -> Result<GroupPlan, ModelError> {
    let parent_path = path
        .parent()
        .ok_or_else(|| ModelError::NotUngroupable(path.to_string()))?;
    let group = find(root, path)?;
    let owner = find(root, &parent_path)?;
    if group.state_type() != StateType::Hierarchy || owner.state_type() != StateType::Hierarchy {
        return Err(ModelError::NotUngroupable(path.to_string()));
    }
    let inner = group.require_container()?;
    let scope = owner.require_container()?;
    let group_id = group.id();
    let group_start = inner.start_state();

    let mut actions = Vec::new();
    let start_moves = scope.start_state() == Some(group_id);
    if start_moves {
        actions.push(Action::SetStartState {
            container: parent_path.clone(),
            state_id: None,
        });
    }
    for transition in scope.transitions().values().filter(|t| t.references(group_id)) {
        actions.push(Action::RemoveTransition {
            container: parent_path.clone(),
            transition_id: transition.id,
        });
    }
    for flow in scope.data_flows().values().filter(|f| f.references(group_id)) {
        actions.push(Action::RemoveDataFlow {
            container: parent_path.clone(),
            data_flow_id: flow.id,
        });
    }
    actions.push(Action::RemoveState {
        container: parent_path.clone(),
        state_id: group_id.to_string(),
    });
    for child in inner.children().values() {
        actions.push(Action::AddState {
            container: parent_path.clone(),
            state: child.clone(),
        });
    }

    let mut variable_ids: BTreeMap<PortId, PortId> = BTreeMap::new();
    let mut next_port = owner.next_port_id();
    let mut names: Vec<String> = scope
        .scoped_variables()
        .values()
        .map(|v| v.name().to_string())
        .collect();
    for variable in inner.scoped_variables().values() {
        let mut moved = variable.clone().with_id(next_port);
        let name = unique_name(variable.name(), names.iter().map(String::as_str));
        moved.rename(name.clone())?;
        names.push(name);
        variable_ids.insert(variable.id(), next_port);
        actions.push(Action::AddPort {
            state: parent_path.clone(),
            kind: PortKind::Scoped,
            port: moved,
        });
        next_port += 1;
    }

    let mut transitions = Vec::new();
    for transition in inner.transitions().values() {
        if transition.to_state != group_id {
            transitions.push((
                transition.from_state.clone(),
                transition.from_outcome,
                transition.to_state.clone(),
                None,
            ));
            continue;
        }
        let exit = transition
            .to_outcome
            .and_then(|outcome| scope.transition_for(group_id, outcome));
        match exit {
            Some(exit) if exit.to_state == group_id => match group_start {
                Some(start) => transitions.push((
                    transition.from_state.clone(),
                    transition.from_outcome,
                    start.to_string(),
                    None,
                )),
                None => warn!(transition = transition.id, "dropped loop into a group without start state"),
            },
            Some(exit) => transitions.push((
                transition.from_state.clone(),
                transition.from_outcome,
                exit.to_state.clone(),
                exit.to_outcome,
            )),
            None => warn!(
                group = %group_id,
                transition = transition.id,
                "dropped exit transition with no continuation outside the group"
            ),
        }
    }
    for transition in scope
        .transitions()
        .values()
        .filter(|t| t.to_state == group_id && t.from_state != group_id)
    {
        match group_start {
            Some(start) => transitions.push((
                transition.from_state.clone(),
                transition.from_outcome,
                start.to_string(),
                None,
            )),
            None => warn!(
                transition = transition.id,
                "dropped transition into a group without start state"
            ),
        }
    }

    let outer_sources = |port: PortId| -> Vec<(StateId, PortId)> {
        scope
            .data_flows()
            .values()
            .filter(|f| f.to_state == group_id && f.to_port == port)
            .map(|f| (f.from_state.clone(), f.from_port))
            .collect()
    };
    let outer_sinks = |port: PortId| -> Vec<(StateId, PortId)> {
        scope
            .data_flows()
            .values()
            .filter(|f| f.from_state == group_id && f.from_port == port)
            .map(|f| (f.to_state.clone(), f.to_port))
            .collect()
    };

    let mut flows = Vec::new();
    for flow in inner.data_flows().values() {
        let sources = if flow.from_state == group_id {
            match variable_ids.get(&flow.from_port) {
                Some(id) => vec![(owner.id().to_string(), *id)],
                None => outer_sources(flow.from_port),
            }
        } else {
            vec![(flow.from_state.clone(), flow.from_port)]
        };
        let sinks = if flow.to_state == group_id {
            match variable_ids.get(&flow.to_port) {
                Some(id) => vec![(owner.id().to_string(), *id)],
                None => outer_sinks(flow.to_port),
            }
        } else {
            vec![(flow.to_state.clone(), flow.to_port)]
        };
        if sources.is_empty() || sinks.is_empty() {
            warn!(
                group = %group_id,
                data_flow = flow.id,
                "dropped data flow with no counterpart outside the group"
            );
            continue;
        }
        for source in &sources {
            for sink in &sinks {
                flows.push((source.clone(), sink.clone()));
            }
        }
    }

    let first_transition = scope.next_transition_id();
    for (offset, (from_state, from_outcome, to_state, to_outcome)) in
        transitions.into_iter().enumerate()
    {
        actions.push(Action::AddTransition {
            container: parent_path.clone(),
            transition: Transition::new(
                first_transition + offset as u32,
                from_state,
                from_outcome,
                to_state,
                to_outcome,
            ),
        });
    }
    let first_flow = scope.next_data_flow_id();
    for (offset, ((from_state, from_port), (to_state, to_port))) in flows.into_iter().enumerate() {
        actions.push(Action::AddDataFlow {
            container: parent_path.clone(),
            data_flow: DataFlow::new(first_flow + offset as u32, from_state, from_port, to_state, to_port),
        });
    }
    if start_moves {
        if let Some(start) = group_start {
            actions.push(Action::SetStartState {
                container: parent_path.clone(),
                state_id: Some(start.to_string()),
            });
        }
    }

    Ok(GroupPlan {
        action: Action::Batch {
            label: format!("ungroup_state {path}"),
            actions,
        },
        state_ids: inner.children().keys().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, SUCCESS};
    use crate::hierarchy::validate;

    fn port(id: PortId, name: &str) -> DataPort {
        DataPort::new(id, name, DataType::Int, Value::Null).unwrap()
    }

    fn leaf(id: &str) -> State {
        let mut state = State::execution(id, id, "noop");
        state.add_port(PortKind::Input, port(0, "x")).unwrap();
        state.add_port(PortKind::Output, port(1, "y")).unwrap();
        state
    }

    /// ROOT: A -> B -> C -> ROOT, data chained through all three.
    fn chain() -> State {
        let mut root = State::hierarchy("ROOT", "root");
        root.add_port(PortKind::Input, port(0, "x")).unwrap();
        root.add_port(PortKind::Output, port(1, "y")).unwrap();
        root.add_port(PortKind::Scoped, port(2, "s")).unwrap();
        for id in ["A", "B", "C"] {
            root.add_child(leaf(id)).unwrap();
        }
        root.add_transition("A", SUCCESS, "B", None).unwrap();
        root.add_transition("B", SUCCESS, "C", None).unwrap();
        root.add_transition("C", SUCCESS, "ROOT", Some(SUCCESS)).unwrap();
        root.set_start_state(Some("A".into())).unwrap();
        root.add_data_flow("ROOT", 0, "A", 0).unwrap();
        root.add_data_flow("A", 1, "B", 0).unwrap();
        root.add_data_flow("B", 1, "C", 0).unwrap();
        root.add_data_flow("C", 1, "ROOT", 1).unwrap();
        root.add_data_flow("B", 1, "ROOT", 2).unwrap();
        root
    }

    type Edge = (String, i64, String, Option<i64>);
    type Wire = (String, PortId, String, PortId);

    fn edges(state: &State) -> BTreeSet<Edge> {
        state
            .container()
            .unwrap()
            .transitions()
            .values()
            .map(|t| (t.from_state.clone(), t.from_outcome, t.to_state.clone(), t.to_outcome))
            .collect()
    }

    fn wires(state: &State) -> BTreeSet<Wire> {
        state
            .container()
            .unwrap()
            .data_flows()
            .values()
            .map(|f| (f.from_state.clone(), f.from_port, f.to_state.clone(), f.to_port))
            .collect()
    }

    #[test]
    fn grouping_splits_crossing_edges() {
        let mut root = chain();
        let plan = plan_group(&root, &StatePath::root("ROOT"), &["A".into(), "B".into()], &[]).unwrap();
        let group_id = plan.state_ids[0].clone();
        plan.action.apply(&mut root).unwrap();

        assert!(validate(&root).is_success());
        let container = root.container().unwrap();
        assert_eq!(container.start_state(), Some(group_id.as_str()));
        assert!(root.child("A").is_none());

        let group = root.child(&group_id).unwrap();
        assert_eq!(group.container().unwrap().start_state(), Some("A"));
        assert_eq!(group.input_ports().len(), 1);
        // B's output feeds both C and the scoped variable through one port.
        assert_eq!(group.output_ports().len(), 1);
        assert!(edges(group).contains(&("A".into(), SUCCESS, "B".into(), None)));
        assert!(edges(&root).iter().any(|(from, _, to, _)| *from == group_id && to == "C"));
    }

    #[test]
    fn ungrouping_restores_connectivity() {
        let original = chain();
        let mut root = original.clone();
        let plan = plan_group(&root, &StatePath::root("ROOT"), &["A".into(), "B".into()], &[2]).unwrap();
        let group_path = StatePath::root("ROOT").child(&plan.state_ids[0]);
        plan.action.apply(&mut root).unwrap();
        assert!(validate(&root).is_success());

        let plan = plan_ungroup(&root, &group_path).unwrap();
        plan.action.apply(&mut root).unwrap();
        assert!(validate(&root).is_success());

        assert_eq!(edges(&root), edges(&original));
        assert_eq!(root.container().unwrap().start_state(), Some("A"));
        // The scoped variable came back under a new id.
        let scoped = root.container().unwrap().scoped_variables();
        assert_eq!(scoped.len(), 1);
        let new_id = *scoped.keys().next().unwrap();
        let expected: BTreeSet<Wire> = wires(&original)
            .into_iter()
            .map(|(from, fp, to, tp)| {
                let tp = if to == "ROOT" && tp == 2 { new_id } else { tp };
                (from, fp, to, tp)
            })
            .collect();
        assert_eq!(wires(&root), expected);
    }

    #[test]
    fn group_with_two_entries_is_rejected() {
        let mut root = chain();
        root.add_transition("A", crate::core::ABORTED, "C", None).unwrap();
        let err = plan_group(&root, &StatePath::root("ROOT"), &["B".into(), "C".into()], &[]).unwrap_err();
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn root_cannot_be_ungrouped() {
        let root = chain();
        let err = plan_ungroup(&root, &StatePath::root("ROOT")).unwrap_err();
        assert_eq!(err, ModelError::NotUngroupable("ROOT".into()));
    }

    #[test]
    fn undoing_a_group_is_one_step() {
        let original = chain();
        let mut root = original.clone();
        let plan = plan_group(&root, &StatePath::root("ROOT"), &["B".into(), "C".into()], &[]).unwrap();
        let inverse = plan.action.apply(&mut root).unwrap();
        assert_ne!(root, original);
        inverse.apply(&mut root).unwrap();
        assert_eq!(root, original);
    }
}
