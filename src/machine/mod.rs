//! State machines: a root state plus its editing history.
//!
//! [`StateMachine`] is the editing surface. Each call locates its target by
//! [`StatePath`], applies one [`Action`] and records it, so every edit can be
//! undone. Edits are rejected with [`ModelError::MachineRunning`] while an
//! engine executes the machine.
//!
//! # Example
//!
//! ```rust
//! use statecraft::core::{DataType, State, StatePath, SUCCESS};
//! use statecraft::machine::StateMachine;
//!
//! let mut machine = StateMachine::new(State::hierarchy("ROOT", "root"));
//! let root = StatePath::root("ROOT");
//! machine.add_state(&root, State::execution("A", "first", "noop")).unwrap();
//! machine.set_start_state(&root, Some("A".into())).unwrap();
//! machine.add_transition(&root, "A", SUCCESS, "ROOT", Some(SUCCESS)).unwrap();
//!
//! assert_eq!(machine.history().len(), 3);
//! machine.undo().unwrap();
//! assert!(machine.root().container().unwrap().transitions().is_empty());
//! ```

mod library;
mod manager;

pub use library::{expand_libraries, LibraryCatalog, LibraryResolver, MAX_LIBRARY_DEPTH};
pub use manager::StateMachineManager;

use crate::config::EngineConfig;
use crate::core::{
    DataFlow, DataFlowId, DataPort, DataType, ModelError, OutcomeId, PortId, PortKind, State,
    StateId, StatePath, Transition, TransitionId, Value,
};
use crate::hierarchy::{
    heal_dangling_transitions, plan_group, plan_ungroup, validate_all, GroupPlan,
};
use crate::history::{Action, HistoryLog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Clears the machine's running flag when the run it guards ends.
#[derive(Debug)]
pub(crate) struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A state tree together with its undo history.
#[derive(Debug)]
pub struct StateMachine {
    id: Uuid,
    root: State,
    history: HistoryLog,
    running: Arc<AtomicBool>,
    diagnostics: Vec<String>,
}

impl StateMachine {
    pub fn new(root: State) -> Self {
        Self {
            id: Uuid::new_v4(),
            root,
            history: HistoryLog::new(),
            running: Arc::new(AtomicBool::new(false)),
            diagnostics: Vec::new(),
        }
    }

    /// Apply the history bound of `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.history = HistoryLog::with_limit(config.history_limit);
        self
    }

    /// Materialize a loaded tree: expand libraries, heal dangling transitions
    /// and validate, without recording any history.
    ///
    /// Validation failures are reported together in one
    /// [`ModelError::Validation`].
    pub fn load(root: State, resolver: &dyn LibraryResolver) -> Result<Self, ModelError> {
        let mut machine = Self::new(root);
        let Self {
            root,
            history,
            diagnostics,
            ..
        } = &mut machine;
        history.with_replay(|| -> Result<(), ModelError> {
            let expanded = expand_libraries(root, resolver)?;
            diagnostics.extend(heal_dangling_transitions(root));
            info!(
                root = %root.id(),
                libraries = expanded,
                healed = diagnostics.len(),
                "loaded state machine"
            );
            validate_all(root).map_err(|violations| {
                ModelError::Validation(
                    violations
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            })
        })?;
        Ok(machine)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &State {
        &self.root
    }

    pub fn root_path(&self) -> StatePath {
        StatePath::root(self.root.id())
    }

    pub fn state(&self, path: &StatePath) -> Option<&State> {
        self.root.find(path)
    }

    /// Depth-first enumeration of the whole tree in stable child order.
    pub fn walk(&self) -> Vec<(StatePath, &State)> {
        self.root.walk(&self.root_path())
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Repairs made while loading.
    pub fn load_diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_run(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(Arc::clone(&self.running)))
    }

    fn ensure_idle(&self) -> Result<(), ModelError> {
        if self.is_running() {
            Err(ModelError::MachineRunning)
        } else {
            Ok(())
        }
    }

    fn find(&self, path: &StatePath) -> Result<&State, ModelError> {
        self.root
            .find(path)
            .ok_or_else(|| ModelError::NotFound(format!("state '{path}'")))
    }

    /// Apply `action` and record it as one history entry.
    pub fn apply(&mut self, action: Action) -> Result<(), ModelError> {
        self.ensure_idle()?;
        let inverse = action.apply(&mut self.root)?;
        self.history.record(action, inverse);
        Ok(())
    }

    /// Apply several actions as one undoable step.
    pub fn apply_batch(
        &mut self,
        label: impl Into<String>,
        actions: Vec<Action>,
    ) -> Result<(), ModelError> {
        self.apply(Action::Batch {
            label: label.into(),
            actions,
        })
    }

    pub fn add_state(&mut self, container: &StatePath, state: State) -> Result<StateId, ModelError> {
        let id = state.id().to_string();
        self.apply(Action::AddState {
            container: container.clone(),
            state,
        })?;
        Ok(id)
    }

    pub fn remove_state(&mut self, container: &StatePath, state_id: &str) -> Result<(), ModelError> {
        self.apply(Action::RemoveState {
            container: container.clone(),
            state_id: state_id.to_string(),
        })
    }

    pub fn add_transition(
        &mut self,
        container: &StatePath,
        from_state: &str,
        from_outcome: OutcomeId,
        to_state: &str,
        to_outcome: Option<OutcomeId>,
    ) -> Result<TransitionId, ModelError> {
        let id = self.find(container)?.require_container()?.next_transition_id();
        self.apply(Action::AddTransition {
            container: container.clone(),
            transition: Transition::new(id, from_state, from_outcome, to_state, to_outcome),
        })?;
        Ok(id)
    }

    pub fn remove_transition(
        &mut self,
        container: &StatePath,
        transition_id: TransitionId,
    ) -> Result<(), ModelError> {
        self.apply(Action::RemoveTransition {
            container: container.clone(),
            transition_id,
        })
    }

    pub fn add_data_flow(
        &mut self,
        container: &StatePath,
        from_state: &str,
        from_port: PortId,
        to_state: &str,
        to_port: PortId,
    ) -> Result<DataFlowId, ModelError> {
        let id = self.find(container)?.require_container()?.next_data_flow_id();
        self.apply(Action::AddDataFlow {
            container: container.clone(),
            data_flow: DataFlow::new(id, from_state, from_port, to_state, to_port),
        })?;
        Ok(id)
    }

    pub fn remove_data_flow(
        &mut self,
        container: &StatePath,
        data_flow_id: DataFlowId,
    ) -> Result<(), ModelError> {
        self.apply(Action::RemoveDataFlow {
            container: container.clone(),
            data_flow_id,
        })
    }

    fn add_port(
        &mut self,
        state: &StatePath,
        kind: PortKind,
        name: &str,
        data_type: DataType,
        default_value: Value,
    ) -> Result<PortId, ModelError> {
        let id = self.find(state)?.next_port_id();
        let port = DataPort::new(id, name, data_type, default_value)?;
        self.apply(Action::AddPort {
            state: state.clone(),
            kind,
            port,
        })?;
        Ok(id)
    }

    pub fn add_input_port(
        &mut self,
        state: &StatePath,
        name: &str,
        data_type: DataType,
        default_value: impl Into<Value>,
    ) -> Result<PortId, ModelError> {
        self.add_port(state, PortKind::Input, name, data_type, default_value.into())
    }

    pub fn add_output_port(
        &mut self,
        state: &StatePath,
        name: &str,
        data_type: DataType,
        default_value: impl Into<Value>,
    ) -> Result<PortId, ModelError> {
        self.add_port(state, PortKind::Output, name, data_type, default_value.into())
    }

    pub fn add_scoped_variable(
        &mut self,
        state: &StatePath,
        name: &str,
        data_type: DataType,
        default_value: impl Into<Value>,
    ) -> Result<PortId, ModelError> {
        self.add_port(state, PortKind::Scoped, name, data_type, default_value.into())
    }

    /// Remove a port or scoped variable and every data flow attached to it.
    pub fn remove_port(&mut self, state: &StatePath, port_id: PortId) -> Result<(), ModelError> {
        self.apply(Action::RemovePort {
            state: state.clone(),
            port_id,
        })
    }

    pub fn rename(&mut self, state: &StatePath, name: impl Into<String>) -> Result<(), ModelError> {
        self.apply(Action::Rename {
            state: state.clone(),
            name: name.into(),
        })
    }

    pub fn rename_port(
        &mut self,
        state: &StatePath,
        port_id: PortId,
        name: impl Into<String>,
    ) -> Result<(), ModelError> {
        self.apply(Action::RenamePort {
            state: state.clone(),
            port_id,
            name: name.into(),
        })
    }

    /// Change a port's type. Attached data flows must stay type compatible.
    pub fn change_data_type(
        &mut self,
        state: &StatePath,
        port_id: PortId,
        data_type: DataType,
        default_value: Option<Value>,
    ) -> Result<(), ModelError> {
        self.apply(Action::ChangeDataType {
            state: state.clone(),
            port_id,
            data_type,
            default_value,
        })
    }

    pub fn set_default_value(
        &mut self,
        state: &StatePath,
        port_id: PortId,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        self.apply(Action::SetDefaultValue {
            state: state.clone(),
            port_id,
            value: value.into(),
        })
    }

    pub fn set_start_state(
        &mut self,
        container: &StatePath,
        state_id: Option<StateId>,
    ) -> Result<(), ModelError> {
        self.apply(Action::SetStartState {
            container: container.clone(),
            state_id,
        })
    }

    /// Wrap sibling states and scoped variables of `container` into a new
    /// hierarchy state. Returns the new state's id.
    pub fn group_states(
        &mut self,
        container: &StatePath,
        state_ids: &[StateId],
        scoped_variable_ids: &[PortId],
    ) -> Result<StateId, ModelError> {
        self.ensure_idle()?;
        let GroupPlan { action, state_ids } =
            plan_group(&self.root, container, state_ids, scoped_variable_ids)?;
        let group_id = state_ids
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Validation("grouping produced no state".into()))?;
        self.apply(action)?;
        debug!(container = %container, group = %group_id, "grouped states");
        Ok(group_id)
    }

    /// Dissolve the hierarchy state at `path` into its parent. Returns the
    /// ids of the promoted children.
    pub fn ungroup_state(&mut self, path: &StatePath) -> Result<Vec<StateId>, ModelError> {
        self.ensure_idle()?;
        let GroupPlan { action, state_ids } = plan_ungroup(&self.root, path)?;
        self.apply(action)?;
        debug!(state = %path, promoted = state_ids.len(), "ungrouped state");
        Ok(state_ids)
    }

    /// Revert the last recorded edit. Returns `false` at the start of the history.
    pub fn undo(&mut self) -> Result<bool, ModelError> {
        self.ensure_idle()?;
        self.history.undo(&mut self.root)
    }

    /// Re-apply the last undone edit. Returns `false` at the end of the history.
    pub fn redo(&mut self) -> Result<bool, ModelError> {
        self.ensure_idle()?;
        self.history.redo(&mut self.root)
    }
}
