//! Structural mutations as command values.
//!
//! Every edit of a state tree is an [`Action`]. Applying an action returns its
//! inverse, so undo is "apply what the last apply returned" and redo is
//! "apply the original again". Composite edits are a [`Action::Batch`], which
//! applies atomically: if one primitive fails, the ones already applied are
//! rolled back before the error is returned.

use crate::core::{
    DataFlow, DataFlowId, DataPort, DataType, ModelError, PortId, PortKind, State, StateId,
    StatePath, Transition, TransitionId, Value,
};
use crate::hierarchy::RemovedState;
use serde::{Deserialize, Serialize};
use tracing::error;

/// One undoable mutation of a state tree. Paths are absolute, rooted at the tree root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    AddState {
        container: StatePath,
        state: State,
    },
    RemoveState {
        container: StatePath,
        state_id: StateId,
    },
    RestoreState {
        container: StatePath,
        removed: RemovedState,
    },
    AddTransition {
        container: StatePath,
        transition: Transition,
    },
    RemoveTransition {
        container: StatePath,
        transition_id: TransitionId,
    },
    AddDataFlow {
        container: StatePath,
        data_flow: DataFlow,
    },
    RemoveDataFlow {
        container: StatePath,
        data_flow_id: DataFlowId,
    },
    AddPort {
        state: StatePath,
        kind: PortKind,
        port: DataPort,
    },
    /// Removes a port and every data flow touching it, inside the state and in its parent.
    RemovePort {
        state: StatePath,
        port_id: PortId,
    },
    RestorePort {
        state: StatePath,
        kind: PortKind,
        port: DataPort,
        flows: Vec<(StatePath, DataFlow)>,
    },
    Rename {
        state: StatePath,
        name: String,
    },
    RenamePort {
        state: StatePath,
        port_id: PortId,
        name: String,
    },
    ChangeDataType {
        state: StatePath,
        port_id: PortId,
        data_type: DataType,
        default_value: Option<Value>,
    },
    SetDefaultValue {
        state: StatePath,
        port_id: PortId,
        value: Value,
    },
    ReplacePort {
        state: StatePath,
        port: DataPort,
    },
    SetStartState {
        container: StatePath,
        state_id: Option<StateId>,
    },
    Batch {
        label: String,
        actions: Vec<Action>,
    },
}

impl Action {
    /// Name of the editing method this action stands for.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::AddState { .. } => "add_state",
            Self::RemoveState { .. } => "remove_state",
            Self::RestoreState { .. } => "restore_state",
            Self::AddTransition { .. } => "add_transition",
            Self::RemoveTransition { .. } => "remove_transition",
            Self::AddDataFlow { .. } => "add_data_flow",
            Self::RemoveDataFlow { .. } => "remove_data_flow",
            Self::AddPort { .. } => "add_port",
            Self::RemovePort { .. } => "remove_port",
            Self::RestorePort { .. } => "restore_port",
            Self::Rename { .. } => "rename",
            Self::RenamePort { .. } => "rename_port",
            Self::ChangeDataType { .. } => "change_data_type",
            Self::SetDefaultValue { .. } => "set_default_value",
            Self::ReplacePort { .. } => "replace_port",
            Self::SetStartState { .. } => "set_start_state",
            Self::Batch { .. } => "batch",
        }
    }

    /// Human readable description of what the action targets.
    pub fn target(&self) -> String {
        match self {
            Self::AddState { container, state } => format!("{container}/{}", state.id()),
            Self::RemoveState {
                container,
                state_id,
            } => format!("{container}/{state_id}"),
            Self::RestoreState { container, removed } => {
                format!("{container}/{}", removed.state.id())
            }
            Self::AddTransition { container, .. }
            | Self::RemoveTransition { container, .. }
            | Self::AddDataFlow { container, .. }
            | Self::RemoveDataFlow { container, .. }
            | Self::SetStartState { container, .. } => container.to_string(),
            Self::AddPort { state, .. }
            | Self::RemovePort { state, .. }
            | Self::RestorePort { state, .. }
            | Self::Rename { state, .. }
            | Self::RenamePort { state, .. }
            | Self::ChangeDataType { state, .. }
            | Self::SetDefaultValue { state, .. }
            | Self::ReplacePort { state, .. } => state.to_string(),
            Self::Batch { label, .. } => label.clone(),
        }
    }

    /// Apply the action to the tree rooted at `root` and return its inverse.
    ///
    /// On error the tree is unchanged.
    pub fn apply(&self, root: &mut State) -> Result<Action, ModelError> {
        match self {
            Self::AddState { container, state } => {
                ensure_unique_ids(root, state)?;
                let state_id = locate(root, container)?.add_child(state.clone())?;
                Ok(Self::RemoveState {
                    container: container.clone(),
                    state_id,
                })
            }
            Self::RemoveState {
                container,
                state_id,
            } => {
                let removed = locate(root, container)?.remove_child(state_id)?;
                Ok(Self::RestoreState {
                    container: container.clone(),
                    removed,
                })
            }
            Self::RestoreState { container, removed } => {
                ensure_unique_ids(root, &removed.state)?;
                let target = locate(root, container)?;
                let snapshot = target.clone();
                match target.restore_child(removed.clone()) {
                    Ok(state_id) => Ok(Self::RemoveState {
                        container: container.clone(),
                        state_id,
                    }),
                    Err(e) => {
                        *target = snapshot;
                        Err(e)
                    }
                }
            }
            Self::AddTransition {
                container,
                transition,
            } => {
                let transition_id = locate(root, container)?.insert_transition(transition.clone())?;
                Ok(Self::RemoveTransition {
                    container: container.clone(),
                    transition_id,
                })
            }
            Self::RemoveTransition {
                container,
                transition_id,
            } => {
                let transition = locate(root, container)?.remove_transition(*transition_id)?;
                Ok(Self::AddTransition {
                    container: container.clone(),
                    transition,
                })
            }
            Self::AddDataFlow {
                container,
                data_flow,
            } => {
                let data_flow_id = locate(root, container)?.insert_data_flow(data_flow.clone())?;
                Ok(Self::RemoveDataFlow {
                    container: container.clone(),
                    data_flow_id,
                })
            }
            Self::RemoveDataFlow {
                container,
                data_flow_id,
            } => {
                let data_flow = locate(root, container)?.remove_data_flow(*data_flow_id)?;
                Ok(Self::AddDataFlow {
                    container: container.clone(),
                    data_flow,
                })
            }
            Self::AddPort { state, kind, port } => {
                let port_id = locate(root, state)?.add_port(*kind, port.clone())?;
                Ok(Self::RemovePort {
                    state: state.clone(),
                    port_id,
                })
            }
            Self::RemovePort { state, port_id } => remove_port(root, state, *port_id),
            Self::RestorePort {
                state,
                kind,
                port,
                flows,
            } => {
                let snapshot = root.clone();
                match restore_port(root, state, *kind, port, flows) {
                    Ok(inverse) => Ok(inverse),
                    Err(e) => {
                        *root = snapshot;
                        Err(e)
                    }
                }
            }
            Self::Rename { state, name } => {
                let target = locate(root, state)?;
                let previous = std::mem::replace(&mut target.name, name.clone());
                Ok(Self::Rename {
                    state: state.clone(),
                    name: previous,
                })
            }
            Self::RenamePort {
                state,
                port_id,
                name,
            } => {
                let mut port = port_of(root, state, *port_id)?;
                port.rename(name.clone())?;
                replace_port(root, state, port)
            }
            Self::ChangeDataType {
                state,
                port_id,
                data_type,
                default_value,
            } => {
                let mut port = port_of(root, state, *port_id)?;
                port.change_data_type(*data_type, default_value.clone());
                replace_port(root, state, port)
            }
            Self::SetDefaultValue {
                state,
                port_id,
                value,
            } => {
                let mut port = port_of(root, state, *port_id)?;
                port.set_default_value(value.clone())?;
                replace_port(root, state, port)
            }
            Self::ReplacePort { state, port } => replace_port(root, state, port.clone()),
            Self::SetStartState {
                container,
                state_id,
            } => {
                let target = locate(root, container)?;
                let previous = target
                    .require_container()?
                    .start_state()
                    .map(str::to_string);
                target.set_start_state(state_id.clone())?;
                Ok(Self::SetStartState {
                    container: container.clone(),
                    state_id: previous,
                })
            }
            Self::Batch { label, actions } => {
                let mut inverses = Vec::with_capacity(actions.len());
                for action in actions {
                    match action.apply(root) {
                        Ok(inverse) => inverses.push(inverse),
                        Err(e) => {
                            rollback(root, inverses);
                            return Err(e);
                        }
                    }
                }
                inverses.reverse();
                Ok(Self::Batch {
                    label: label.clone(),
                    actions: inverses,
                })
            }
        }
    }
}

fn rollback(root: &mut State, inverses: Vec<Action>) {
    for inverse in inverses.into_iter().rev() {
        if let Err(e) = inverse.apply(root) {
            error!(
                method = inverse.method_name(),
                target = %inverse.target(),
                error = %e,
                "rollback of a partially applied batch failed"
            );
        }
    }
}

fn locate<'a>(root: &'a mut State, path: &StatePath) -> Result<&'a mut State, ModelError> {
    root.find_mut(path)
        .ok_or_else(|| ModelError::NotFound(format!("state '{path}'")))
}

fn find<'a>(root: &'a State, path: &StatePath) -> Result<&'a State, ModelError> {
    root.find(path)
        .ok_or_else(|| ModelError::NotFound(format!("state '{path}'")))
}

fn port_of(root: &State, path: &StatePath, port_id: PortId) -> Result<DataPort, ModelError> {
    find(root, path)?
        .port(port_id)
        .map(|(_, port)| port.clone())
        .ok_or_else(|| ModelError::NotFound(format!("port {port_id} of state '{path}'")))
}

fn ensure_unique_ids(root: &State, state: &State) -> Result<(), ModelError> {
    match state
        .walk(&StatePath::root(state.id()))
        .into_iter()
        .find(|(_, s)| root.contains_id(s.id()))
    {
        Some((_, s)) => Err(ModelError::DuplicateId(format!("state '{}'", s.id()))),
        None => Ok(()),
    }
}

/// Re-check every data flow touching a port, inside the state and in its parent.
fn check_port_flows(root: &State, path: &StatePath, port_id: PortId) -> Result<(), ModelError> {
    let state = find(root, path)?;
    let mut owners = vec![state];
    if let Some(parent) = path.parent() {
        owners.push(find(root, &parent)?);
    }
    for owner in owners {
        if let Some(container) = owner.container() {
            for flow in container
                .data_flows()
                .values()
                .filter(|f| f.touches_port(state.id(), port_id))
            {
                owner.check_data_flow(flow)?;
            }
        }
    }
    Ok(())
}

fn replace_port(root: &mut State, path: &StatePath, port: DataPort) -> Result<Action, ModelError> {
    port.validate()?;
    let target = locate(root, path)?;
    let (kind, _) = target
        .port(port.id())
        .ok_or_else(|| ModelError::NotFound(format!("port {} of state '{path}'", port.id())))?;
    if target
        .port_by_name(kind, port.name())
        .is_some_and(|other| other.id() != port.id())
    {
        return Err(ModelError::Validation(format!(
            "state '{path}' already has a {kind:?} port named '{}'",
            port.name()
        )));
    }
    let previous = std::mem::replace(target.port_mut(port.id())?, port);
    let port_id = previous.id();
    if let Err(e) = check_port_flows(root, path, port_id) {
        *locate(root, path)?.port_mut(port_id)? = previous;
        return Err(e);
    }
    Ok(Action::ReplacePort {
        state: path.clone(),
        port: previous,
    })
}

fn remove_port(root: &mut State, path: &StatePath, port_id: PortId) -> Result<Action, ModelError> {
    let state_id = find(root, path)?
        .port(port_id)
        .map(|_| path.last().to_string())
        .ok_or_else(|| ModelError::NotFound(format!("port {port_id} of state '{path}'")))?;

    let mut flows = Vec::new();
    if let Some(parent) = path.parent() {
        for flow in locate(root, &parent)?.remove_flows_touching(&state_id, port_id) {
            flows.push((parent.clone(), flow));
        }
    }
    let target = locate(root, path)?;
    for flow in target.remove_flows_touching(&state_id, port_id) {
        flows.push((path.clone(), flow));
    }
    let (kind, port) = target.take_port(port_id)?;
    Ok(Action::RestorePort {
        state: path.clone(),
        kind,
        port,
        flows,
    })
}

fn restore_port(
    root: &mut State,
    path: &StatePath,
    kind: PortKind,
    port: &DataPort,
    flows: &[(StatePath, DataFlow)],
) -> Result<Action, ModelError> {
    let port_id = locate(root, path)?.add_port(kind, port.clone())?;
    for (owner, flow) in flows {
        locate(root, owner)?.insert_data_flow(flow.clone())?;
    }
    Ok(Action::RemovePort {
        state: path.clone(),
        port_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SUCCESS;

    fn tree() -> State {
        let mut root = State::hierarchy("ROOT", "root");
        root.add_port(
            PortKind::Input,
            DataPort::new(0, "x", DataType::Int, Value::Null).unwrap(),
        )
        .unwrap();
        let mut a = State::execution("A", "a", "noop");
        a.add_port(
            PortKind::Input,
            DataPort::new(0, "x", DataType::Int, Value::Null).unwrap(),
        )
        .unwrap();
        root.add_child(a).unwrap();
        root.add_data_flow("ROOT", 0, "A", 0).unwrap();
        root.set_start_state(Some("A".into())).unwrap();
        root
    }

    fn root_path() -> StatePath {
        StatePath::root("ROOT")
    }

    #[test]
    fn inverse_restores_the_tree() {
        let mut root = tree();
        let before = root.clone();
        let action = Action::RemoveState {
            container: root_path(),
            state_id: "A".into(),
        };
        let inverse = action.apply(&mut root).unwrap();
        assert!(root.child("A").is_none());
        inverse.apply(&mut root).unwrap();
        assert_eq!(root, before);
    }

    #[test]
    fn removing_a_port_cascades_into_the_parent() {
        let mut root = tree();
        let before = root.clone();
        let inverse = Action::RemovePort {
            state: root_path().child("A"),
            port_id: 0,
        }
        .apply(&mut root)
        .unwrap();
        assert!(root.container().unwrap().data_flows().is_empty());

        inverse.apply(&mut root).unwrap();
        assert_eq!(root, before);
    }

    #[test]
    fn change_data_type_rejects_broken_flows() {
        let mut root = tree();
        let before = root.clone();
        let err = Action::ChangeDataType {
            state: root_path().child("A"),
            port_id: 0,
            data_type: DataType::Str,
            default_value: None,
        }
        .apply(&mut root)
        .unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { .. }));
        assert_eq!(root, before);
    }

    #[test]
    fn failing_batch_rolls_back() {
        let mut root = tree();
        let before = root.clone();
        let batch = Action::Batch {
            label: "broken".into(),
            actions: vec![
                Action::AddState {
                    container: root_path(),
                    state: State::execution("B", "b", "noop"),
                },
                Action::AddTransition {
                    container: root_path(),
                    transition: Transition::new(0, "A", SUCCESS, "B", None),
                },
                Action::AddTransition {
                    container: root_path(),
                    transition: Transition::new(1, "A", SUCCESS, "ROOT", Some(SUCCESS)),
                },
            ],
        };
        assert!(batch.apply(&mut root).is_err());
        assert_eq!(root, before);
    }

    #[test]
    fn state_ids_stay_unique_across_the_tree() {
        let mut root = tree();
        let mut nested = State::hierarchy("N", "nested");
        nested.add_child(State::execution("A", "dup", "noop")).unwrap();
        let err = Action::AddState {
            container: root_path(),
            state: nested,
        }
        .apply(&mut root)
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateId(_)));
    }

    #[test]
    fn rename_returns_the_previous_name() {
        let mut root = tree();
        let inverse = Action::Rename {
            state: root_path().child("A"),
            name: "renamed".into(),
        }
        .apply(&mut root)
        .unwrap();
        assert_eq!(root.child("A").map(State::name), Some("renamed"));
        assert_eq!(
            inverse,
            Action::Rename {
                state: root_path().child("A"),
                name: "a".into()
            }
        );
    }
}
