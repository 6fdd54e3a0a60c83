//! Whole-tree consistency checks.
//!
//! Editing operations keep each container consistent on their own, but a tree
//! obtained from a loader or a checkpoint has never been through them.
//! [`validate`] re-checks every invariant and reports ALL violations at once
//! using `Validation`, so a broken model can be fixed in one pass.

use crate::core::{is_declarable, ModelError, OutcomeId, State, StateKind, StateType, ABORTED};
use std::collections::{BTreeSet, HashSet};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use tracing::warn;

type Check = Validation<(), NonEmptyVec<ModelError>>;

fn check(result: Result<(), ModelError>) -> Check {
    match result {
        Ok(()) => Validation::success(()),
        Err(e) => Validation::fail(e),
    }
}

/// Check every structural invariant of the subtree rooted at `state`.
///
/// # Example
///
/// ```rust
/// use statecraft::core::{State, SUCCESS};
/// use statecraft::hierarchy::validate;
///
/// let mut root = State::hierarchy("ROOT", "root");
/// root.add_child(State::execution("A", "a", "noop")).unwrap();
/// root.add_transition("A", SUCCESS, "ROOT", Some(SUCCESS)).unwrap();
///
/// // No start state yet.
/// assert!(validate(&root).is_failure());
///
/// root.set_start_state(Some("A".to_string())).unwrap();
/// assert!(validate(&root).is_success());
/// ```
pub fn validate(state: &State) -> Validation<(), NonEmptyVec<ModelError>> {
    let mut checks = Vec::new();
    collect(state, &mut checks);
    Validation::all_vec(checks).map(|_| ())
}

/// Like [`validate`], flattened into a plain `Result` with every violation.
pub fn validate_all(state: &State) -> Result<(), Vec<ModelError>> {
    match validate(state) {
        Validation::Success(_) => Ok(()),
        Validation::Failure(errors) => Err(errors.iter().cloned().collect()),
    }
}

fn collect(state: &State, checks: &mut Vec<Check>) {
    for id in state.outcomes().keys().copied() {
        let declarable = if is_declarable(id) {
            Ok(())
        } else {
            Err(ModelError::Validation(format!(
                "outcome {id} of '{}' is neither reserved nor positive",
                state.id()
            )))
        };
        checks.push(check(declarable));
    }
    for port in state.input_ports().values().chain(state.output_ports().values()) {
        checks.push(check(port.validate()));
    }

    if let StateKind::Library {
        content: Some(content),
        ..
    } = state.kind()
    {
        collect(content, checks);
        return;
    }

    let Some(container) = state.container() else {
        return;
    };

    for variable in container.scoped_variables().values() {
        checks.push(check(variable.validate()));
    }

    for child in container.children().values() {
        let parent_ok = if child.parent() == Some(state.id()) {
            Ok(())
        } else {
            Err(ModelError::Validation(format!(
                "child '{}' of '{}' has a stale parent reference",
                child.id(),
                state.id()
            )))
        };
        checks.push(check(parent_ok));
    }

    let mut sources: HashSet<(&str, OutcomeId)> = HashSet::new();
    for transition in container.transitions().values() {
        checks.push(check(state.check_transition(transition)));
        let unique = if sources.insert((transition.from_state.as_str(), transition.from_outcome)) {
            Ok(())
        } else {
            Err(ModelError::Validation(format!(
                "outcome {} of '{}' is connected more than once",
                transition.from_outcome, transition.from_state
            )))
        };
        checks.push(check(unique));
    }

    let mut sinks = HashSet::new();
    for flow in container.data_flows().values() {
        checks.push(check(state.check_data_flow(flow)));
        let unique = if sinks.insert((&flow.to_state, flow.to_port)) {
            Ok(())
        } else {
            Err(ModelError::Validation(format!(
                "port {} of '{}' is the target of more than one data flow",
                flow.to_port, flow.to_state
            )))
        };
        checks.push(check(unique));
    }

    if state.state_type() == StateType::Hierarchy && !container.children().is_empty() {
        let start = match container.start_state() {
            Some(id) if container.child(id).is_some() => Ok(()),
            Some(id) => Err(ModelError::Validation(format!(
                "start state '{id}' of '{}' is not one of its children",
                state.id()
            ))),
            None => Err(ModelError::Validation(format!(
                "hierarchy state '{}' has children but no start state",
                state.id()
            ))),
        };
        checks.push(check(start));
    }

    for child in container.children().values() {
        collect(child, checks);
    }
}

/// Rebind transitions whose target no longer exists to their own container.
///
/// The original target outcome is kept when the container has it, otherwise
/// the transition concludes the container with the error outcome. Returns one
/// diagnostic per repaired transition.
pub fn heal_dangling_transitions(state: &mut State) -> Vec<String> {
    let mut diagnostics = Vec::new();
    heal(state, &mut diagnostics);
    diagnostics
}

fn heal(state: &mut State, diagnostics: &mut Vec<String>) {
    let container_id = state.id.clone();
    let outcomes: BTreeSet<OutcomeId> = state.outcomes.keys().copied().collect();

    match &mut state.kind {
        StateKind::Library {
            content: Some(content),
            ..
        } => heal(content, diagnostics),
        StateKind::Hierarchy(container)
        | StateKind::BarrierConcurrency(container)
        | StateKind::PreemptiveConcurrency(container) => {
            let children: BTreeSet<String> = container.children.keys().cloned().collect();
            for transition in container.transitions.values_mut() {
                if transition.to_state == container_id || children.contains(&transition.to_state)
                {
                    continue;
                }
                let wanted = transition.to_outcome.unwrap_or(transition.from_outcome);
                let outcome = if outcomes.contains(&wanted) {
                    wanted
                } else {
                    ABORTED
                };
                let message = format!(
                    "transition {} in '{}' pointed at missing state '{}', rebound to the container with outcome {}",
                    transition.id, container_id, transition.to_state, outcome
                );
                warn!(
                    container = %container_id,
                    transition = transition.id,
                    target = %transition.to_state,
                    outcome,
                    "healed dangling transition"
                );
                transition.to_state = container_id.clone();
                transition.to_outcome = Some(outcome);
                diagnostics.push(message);
            }
            for child in container.children.values_mut() {
                heal(child, diagnostics);
            }
        }
        StateKind::Execution { .. } | StateKind::Library { content: None, .. } => {}
    }
}
