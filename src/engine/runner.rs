//! The recursive execution algorithm.
//!
//! Each container keeps a scope of slot values keyed by `(state id, port id)`:
//! its own inputs, its scoped variables, its outputs and the outputs of its
//! children. Data flows are resolved against that scope when a child is
//! entered and when it concludes. Faults never unwind past the state they
//! happen in; they become the error outcome.

use super::control::{Controller, Interrupted, Resume};
use super::history::Monitor;
use super::script::{ScriptContext, ScriptError, ScriptRegistry};
use crate::core::{
    Container, DataPort, OutcomeId, PortId, State, StateId, StateKind, StatePath, Termination,
    Value, ABORTED, PREEMPTED, SUCCESS,
};
use crate::globals::GlobalVariableManager;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

type Scope = HashMap<(StateId, PortId), Value>;

/// Shared, read-only dependencies of one run.
pub(crate) struct RunContext {
    pub(crate) globals: Arc<GlobalVariableManager>,
    pub(crate) scripts: Arc<ScriptRegistry>,
    pub(crate) controller: Arc<Controller>,
    pub(crate) monitor: Arc<Monitor>,
    pub(crate) interval: Duration,
    pub(crate) backward_trail: bool,
}

/// Outcome and output values of one concluded state.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StateResult {
    pub(crate) outcome: OutcomeId,
    pub(crate) outputs: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Policy {
    Barrier,
    Preemptive,
}

/// Outcome of a barrier container from the outcomes of all its children.
///
/// Any error beats any preemption, which beats success.
///
/// # Example
///
/// ```rust
/// use statecraft::core::{ABORTED, PREEMPTED, SUCCESS};
/// use statecraft::engine::barrier_decision;
///
/// assert_eq!(barrier_decision([SUCCESS, SUCCESS]), SUCCESS);
/// assert_eq!(barrier_decision([SUCCESS, PREEMPTED]), PREEMPTED);
/// assert_eq!(barrier_decision([PREEMPTED, ABORTED, SUCCESS]), ABORTED);
/// ```
pub fn barrier_decision(outcomes: impl IntoIterator<Item = OutcomeId>) -> OutcomeId {
    let mut decision = SUCCESS;
    for outcome in outcomes {
        match Termination::of(outcome) {
            Termination::Error => return ABORTED,
            Termination::Preempted => decision = PREEMPTED,
            Termination::Success => {}
        }
    }
    decision
}

/// Run `state` to a terminal outcome.
///
/// `entry` holds the ids below `state` of the path execution should start at.
pub(crate) fn run_state(
    ctx: &RunContext,
    state: &State,
    path: &StatePath,
    inputs: BTreeMap<String, Value>,
    entry: &[StateId],
    token: &CancellationToken,
) -> StateResult {
    let span = info_span!("state", path = %path);
    let _entered = span.enter();

    ctx.monitor.enter(path);
    debug!(state_type = %state.state_type(), "entering state");
    let inputs = resolve_inputs(ctx, state, inputs);

    let result = match state.kind() {
        StateKind::Execution { script } => run_execution(ctx, state, script, path, inputs, token),
        StateKind::Hierarchy(container) => {
            run_hierarchy(ctx, state, container, path, inputs, entry, token)
        }
        StateKind::BarrierConcurrency(container) => run_concurrent(
            ctx,
            state,
            container,
            path,
            inputs,
            entry,
            token,
            Policy::Barrier,
        ),
        StateKind::PreemptiveConcurrency(container) => run_concurrent(
            ctx,
            state,
            container,
            path,
            inputs,
            entry,
            token,
            Policy::Preemptive,
        ),
        StateKind::Library { content, .. } => {
            run_library(ctx, state, content.as_deref(), path, inputs, entry, token)
        }
    };

    ctx.monitor.exit(path, result.outcome);
    if !matches!(state.kind(), StateKind::Execution { .. }) {
        ctx.monitor.reset_below(path);
    }
    debug!(outcome = result.outcome, "exiting state");
    result
}

fn resolve_default(ctx: &RunContext, port: &DataPort) -> Value {
    let Some(key) = port.default_value().deferred_reference() else {
        return port.default_value().clone();
    };
    match ctx.globals.get(key) {
        Ok(Some(value)) => value,
        Ok(None) => {
            warn!(port = port.name(), key, "deferred default refers to a missing global variable");
            Value::Null
        }
        Err(e) => {
            warn!(port = port.name(), key, error = %e, "deferred default could not be read");
            Value::Null
        }
    }
}

fn resolve_inputs(
    ctx: &RunContext,
    state: &State,
    mut provided: BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    state
        .input_ports()
        .values()
        .map(|port| {
            let value = provided
                .remove(port.name())
                .unwrap_or_else(|| resolve_default(ctx, port));
            (port.name().to_string(), value)
        })
        .collect()
}

fn fault(ctx: &RunContext, path: &StatePath, message: String) {
    error!(path = %path, "{message}");
    ctx.monitor.diagnose(format!("{path}: {message}"));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run_execution(
    ctx: &RunContext,
    state: &State,
    script_name: &str,
    path: &StatePath,
    inputs: BTreeMap<String, Value>,
    token: &CancellationToken,
) -> StateResult {
    let Some(script) = ctx.scripts.get(script_name) else {
        fault(ctx, path, format!("no script registered under '{script_name}'"));
        return leaf_result(ctx, state, path, ABORTED, BTreeMap::new());
    };

    let mut script_ctx = ScriptContext {
        path,
        inputs,
        outputs: BTreeMap::new(),
        globals: &ctx.globals,
        token,
        controller: &ctx.controller,
        interval: ctx.interval,
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| script.execute(&mut script_ctx)));

    let outcome = match result {
        Ok(Ok(_)) | Ok(Err(ScriptError::Interrupted)) if token.is_cancelled() => PREEMPTED,
        Ok(Ok(outcome)) if state.outcome(outcome).is_some() => outcome,
        Ok(Ok(outcome)) => {
            fault(ctx, path, format!("script returned unknown outcome {outcome}"));
            ABORTED
        }
        Ok(Err(ScriptError::Interrupted)) => PREEMPTED,
        Ok(Err(e)) => {
            fault(ctx, path, e.to_string());
            ABORTED
        }
        Err(payload) => {
            fault(ctx, path, format!("script panicked: {}", panic_message(payload.as_ref())));
            ABORTED
        }
    };
    leaf_result(ctx, state, path, outcome, script_ctx.outputs)
}

/// Keep the declared, well-typed outputs of a leaf; fill the rest with defaults.
fn leaf_result(
    ctx: &RunContext,
    state: &State,
    path: &StatePath,
    outcome: OutcomeId,
    mut written: BTreeMap<String, Value>,
) -> StateResult {
    let outputs = state
        .output_ports()
        .values()
        .map(|port| {
            let value = match written.remove(port.name()) {
                Some(value) if port.data_type().accepts(&value) => value,
                Some(value) => {
                    ctx.monitor.diagnose(format!(
                        "{path}: output '{}' expects {} but got {value:?}",
                        port.name(),
                        port.data_type()
                    ));
                    warn!(port = port.name(), "discarded output of the wrong type");
                    resolve_default(ctx, port)
                }
                None => resolve_default(ctx, port),
            };
            (port.name().to_string(), value)
        })
        .collect();
    for name in written.keys() {
        debug!(output = %name, "ignored undeclared output");
    }
    StateResult { outcome, outputs }
}

/// Seed a container scope with its inputs and scoped variable defaults.
fn open_scope(
    ctx: &RunContext,
    state: &State,
    container: &Container,
    inputs: &BTreeMap<String, Value>,
) -> Scope {
    let mut scope = Scope::new();
    for port in state.input_ports().values() {
        if let Some(value) = inputs.get(port.name()) {
            scope.insert((state.id().to_string(), port.id()), value.clone());
        }
    }
    for variable in container.scoped_variables().values() {
        scope.insert(
            (state.id().to_string(), variable.id()),
            resolve_default(ctx, variable),
        );
    }
    let sources: Vec<PortId> = state
        .input_ports()
        .keys()
        .chain(container.scoped_variables().keys())
        .copied()
        .collect();
    for port in sources {
        forward_within(container, state.id(), port, &mut scope);
    }
    scope
}

/// Carry the value of the owner's port `from` along flows that end at the
/// owner's own scoped variables or outputs, following chains of such flows.
fn forward_within(container: &Container, owner_id: &str, from: PortId, scope: &mut Scope) {
    let mut pending = vec![from];
    let mut visited = Vec::new();
    while let Some(port) = pending.pop() {
        if visited.contains(&port) {
            continue;
        }
        visited.push(port);
        let Some(value) = scope.get(&(owner_id.to_string(), port)).cloned() else {
            continue;
        };
        for flow in container
            .data_flows()
            .values()
            .filter(|f| f.from_state == owner_id && f.to_state == owner_id && f.from_port == port)
        {
            scope.insert((owner_id.to_string(), flow.to_port), value.clone());
            pending.push(flow.to_port);
        }
    }
}

/// Values flowing into the input ports of `child`.
fn gather_inputs(container: &Container, child: &State, scope: &Scope) -> BTreeMap<String, Value> {
    child
        .input_ports()
        .values()
        .filter_map(|port| {
            let flow = container.flow_into(child.id(), port.id())?;
            let value = scope.get(&(flow.from_state.clone(), flow.from_port))?;
            Some((port.name().to_string(), value.clone()))
        })
        .collect()
}

/// Store the outputs of a concluded child and push them into the container's own sinks.
fn absorb_outputs(
    container: &Container,
    owner_id: &str,
    child: &State,
    result: &StateResult,
    scope: &mut Scope,
) {
    for port in child.output_ports().values() {
        if let Some(value) = result.outputs.get(port.name()) {
            scope.insert((child.id().to_string(), port.id()), value.clone());
        }
    }
    for flow in container
        .data_flows()
        .values()
        .filter(|f| f.from_state == child.id() && f.to_state == owner_id)
    {
        if let Some(value) = scope.get(&(flow.from_state.clone(), flow.from_port)).cloned() {
            scope.insert((owner_id.to_string(), flow.to_port), value);
            forward_within(container, owner_id, flow.to_port, scope);
        }
    }
}

fn conclude(
    ctx: &RunContext,
    state: &State,
    path: &StatePath,
    scope: &Scope,
    outcome: OutcomeId,
) -> StateResult {
    let outcome = if state.outcome(outcome).is_some() {
        outcome
    } else {
        fault(ctx, path, format!("concluded with unknown outcome {outcome}"));
        ABORTED
    };
    let outputs = state
        .output_ports()
        .values()
        .map(|port| {
            let value = scope
                .get(&(state.id().to_string(), port.id()))
                .cloned()
                .unwrap_or_else(|| resolve_default(ctx, port));
            (port.name().to_string(), value)
        })
        .collect();
    StateResult { outcome, outputs }
}

fn run_hierarchy(
    ctx: &RunContext,
    state: &State,
    container: &Container,
    path: &StatePath,
    inputs: BTreeMap<String, Value>,
    entry: &[StateId],
    token: &CancellationToken,
) -> StateResult {
    let mut scope = open_scope(ctx, state, container, &inputs);
    let (mut current, mut entry) = match entry.split_first() {
        Some((first, rest)) => (first.clone(), rest),
        None => match container.start_state() {
            Some(start) => (start.to_string(), &[][..]),
            None if container.children().is_empty() => {
                return conclude(ctx, state, path, &scope, SUCCESS)
            }
            None => {
                fault(ctx, path, "hierarchy has children but no start state".into());
                return conclude(ctx, state, path, &scope, ABORTED);
            }
        },
    };
    let mut trail: Vec<(StateId, Scope)> = Vec::new();

    loop {
        let child_path = path.child(&current);
        match ctx.controller.suspend(&child_path, token) {
            Err(Interrupted) => return conclude(ctx, state, path, &scope, PREEMPTED),
            Ok(Resume::Backward) => {
                match trail.pop() {
                    Some((previous, snapshot)) => {
                        info!(from = %current, to = %previous, "stepping back");
                        current = previous;
                        scope = snapshot;
                    }
                    None if !ctx.backward_trail => {
                        warn!(state = %current, "backward step needs execution history, ignored")
                    }
                    None => warn!(state = %current, "no earlier state to step back to"),
                }
                continue;
            }
            Ok(Resume::Forward) => {}
        }

        let Some(child) = container.child(&current) else {
            fault(ctx, path, format!("transition target '{current}' does not exist"));
            return conclude(ctx, state, path, &scope, ABORTED);
        };
        let child_inputs = gather_inputs(container, child, &scope);
        if ctx.backward_trail {
            trail.push((current.clone(), scope.clone()));
        }
        let result = run_state(ctx, child, &child_path, child_inputs, entry, token);
        entry = &[][..];
        absorb_outputs(container, state.id(), child, &result, &mut scope);

        match container.transition_for(&current, result.outcome) {
            Some(t) if t.to_state == state.id() => {
                return conclude(ctx, state, path, &scope, t.to_outcome.unwrap_or(ABORTED))
            }
            Some(t) => current = t.to_state.clone(),
            None if result.outcome == PREEMPTED || token.is_cancelled() => {
                return conclude(ctx, state, path, &scope, PREEMPTED)
            }
            None => {
                warn!(
                    child = %current,
                    outcome = result.outcome,
                    "no transition for outcome, container fails"
                );
                ctx.monitor.diagnose(format!(
                    "{path}: no transition for outcome {} of '{current}'",
                    result.outcome
                ));
                return conclude(ctx, state, path, &scope, ABORTED);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_concurrent(
    ctx: &RunContext,
    state: &State,
    container: &Container,
    path: &StatePath,
    inputs: BTreeMap<String, Value>,
    entry: &[StateId],
    token: &CancellationToken,
    policy: Policy,
) -> StateResult {
    let mut scope = open_scope(ctx, state, container, &inputs);
    if container.children().is_empty() {
        return conclude(ctx, state, path, &scope, SUCCESS);
    }

    let group = token.child_token();
    let (sender, receiver) = mpsc::channel::<(StateId, StateResult)>();
    let finished: Vec<(StateId, StateResult)> = thread::scope(|s| {
        for child in container.children().values() {
            let sender = sender.clone();
            let branch = group.child_token();
            let child_path = path.child(child.id());
            let child_inputs = gather_inputs(container, child, &scope);
            let child_entry = match entry.split_first() {
                Some((first, rest)) if first == child.id() => rest,
                _ => &[][..],
            };
            s.spawn(move || {
                let result = match ctx.controller.suspend(&child_path, &branch) {
                    Ok(_) => run_state(ctx, child, &child_path, child_inputs, child_entry, &branch),
                    Err(Interrupted) => StateResult {
                        outcome: PREEMPTED,
                        outputs: BTreeMap::new(),
                    },
                };
                // The receiver outlives every branch inside this scope.
                let _ = sender.send((child.id().to_string(), result));
            });
        }
        drop(sender);

        let mut finished = Vec::new();
        for (id, result) in receiver.iter() {
            if policy == Policy::Preemptive && finished.is_empty() {
                debug!(winner = %id, outcome = result.outcome, "first branch concluded, preempting siblings");
                group.cancel();
            }
            finished.push((id, result));
        }
        finished
    });

    if token.is_cancelled() || ctx.controller.hold(token).is_err() {
        return conclude(ctx, state, path, &scope, PREEMPTED);
    }

    let outcome = match policy {
        Policy::Barrier => {
            for (id, result) in &finished {
                if let Some(child) = container.child(id) {
                    absorb_outputs(container, state.id(), child, result, &mut scope);
                }
            }
            barrier_decision(finished.iter().map(|(_, result)| result.outcome))
        }
        Policy::Preemptive => {
            let Some((winner_id, winner)) = finished.first() else {
                return conclude(ctx, state, path, &scope, ABORTED);
            };
            for (id, result) in finished.iter().skip(1) {
                if result.outcome != PREEMPTED {
                    debug!(state = %id, outcome = result.outcome, "late branch recorded as preempted");
                    ctx.monitor.preempted(&path.child(id), PREEMPTED);
                }
            }
            if let Some(child) = container.child(winner_id) {
                absorb_outputs(container, state.id(), child, winner, &mut scope);
            }
            match container.transition_for(winner_id, winner.outcome) {
                Some(t) if t.to_state == state.id() => t.to_outcome.unwrap_or(ABORTED),
                _ => winner.outcome,
            }
        }
    };
    conclude(ctx, state, path, &scope, outcome)
}

fn run_library(
    ctx: &RunContext,
    state: &State,
    content: Option<&State>,
    path: &StatePath,
    inputs: BTreeMap<String, Value>,
    entry: &[StateId],
    token: &CancellationToken,
) -> StateResult {
    let Some(content) = content else {
        fault(ctx, path, "library state was never expanded".into());
        return leaf_result(ctx, state, path, ABORTED, BTreeMap::new());
    };
    let content_entry = match entry.split_first() {
        Some((first, rest)) if first == content.id() => rest,
        _ => &[][..],
    };
    let result = run_state(
        ctx,
        content,
        &path.child(content.id()),
        inputs,
        content_entry,
        token,
    );
    let outcome = if state.outcome(result.outcome).is_some() {
        result.outcome
    } else {
        fault(ctx, path, format!("library content concluded with unmapped outcome {}", result.outcome));
        ABORTED
    };
    leaf_result(ctx, state, path, outcome, result.outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, PortKind};
    use crate::engine::control::ExecutionMode;

    fn context(scripts: ScriptRegistry) -> RunContext {
        RunContext {
            globals: Arc::new(GlobalVariableManager::new()),
            scripts: Arc::new(scripts),
            controller: Arc::new(Controller::new(ExecutionMode::Running)),
            monitor: Arc::new(Monitor::new(true)),
            interval: Duration::from_millis(1),
            backward_trail: true,
        }
    }

    fn run(ctx: &RunContext, root: &State) -> StateResult {
        let token = ctx.controller.stop_token().child_token();
        run_state(
            ctx,
            root,
            &StatePath::root(root.id()),
            BTreeMap::new(),
            &[],
            &token,
        )
    }

    #[test]
    fn barrier_decision_priorities() {
        assert_eq!(barrier_decision([]), SUCCESS);
        assert_eq!(barrier_decision([SUCCESS, 4]), SUCCESS);
        assert_eq!(barrier_decision([ABORTED, PREEMPTED]), ABORTED);
    }

    #[test]
    fn panicking_leaf_maps_to_error_outcome() {
        let ctx = context(ScriptRegistry::new().with("boom", |_| panic!("kaboom")));
        let leaf = State::execution("L", "leaf", "boom");
        let result = run(&ctx, &leaf);
        assert_eq!(result.outcome, ABORTED);
        let report = ctx.monitor.report(result.outcome, result.outputs);
        assert!(report.diagnostics[0].contains("kaboom"));
    }

    #[test]
    fn unknown_script_and_outcome_are_errors() {
        let ctx = context(ScriptRegistry::new().with("odd", |_| Ok(17)));
        assert_eq!(run(&ctx, &State::execution("L", "l", "missing")).outcome, ABORTED);
        assert_eq!(run(&ctx, &State::execution("L", "l", "odd")).outcome, ABORTED);
    }

    #[test]
    fn missing_transition_fails_the_container() {
        let ctx = context(ScriptRegistry::new().with("ok", |_| Ok(SUCCESS)));
        let mut root = State::hierarchy("ROOT", "root");
        root.add_child(State::execution("A", "a", "ok")).unwrap();
        root.set_start_state(Some("A".into())).unwrap();
        assert_eq!(run(&ctx, &root).outcome, ABORTED);
    }

    #[test]
    fn scoped_variable_cycles_settle() {
        let ctx = context(ScriptRegistry::new().with("ok", |_| Ok(SUCCESS)));
        let root = crate::builder::StateBuilder::hierarchy("ROOT")
            .output("out", DataType::Int, 0)
            .scoped("a", DataType::Int, 3)
            .scoped("b", DataType::Int, 0)
            .child(crate::builder::StateBuilder::execution("A", "ok"))
            .start("A")
            .conclude("A", SUCCESS, SUCCESS)
            .flow("ROOT", "a", "ROOT", "b")
            .flow("ROOT", "b", "ROOT", "a")
            .flow("ROOT", "b", "ROOT", "out")
            .build()
            .unwrap();

        let result = run(&ctx, &root);
        assert_eq!(result.outcome, SUCCESS);
        assert_eq!(result.outputs["out"], Value::Int(3));
    }

    #[test]
    fn deferred_defaults_read_globals() {
        let ctx = context(ScriptRegistry::new().with("echo", |ctx| {
            let value = ctx.input("limit").cloned().unwrap_or_default();
            ctx.set_output("limit", value);
            Ok(SUCCESS)
        }));
        ctx.globals.set("max_speed", 12).unwrap();

        let mut leaf = State::execution("L", "leaf", "echo");
        leaf.add_port(
            PortKind::Input,
            DataPort::new(0, "limit", DataType::Int, "$max_speed").unwrap(),
        )
        .unwrap();
        leaf.add_port(
            PortKind::Output,
            DataPort::new(1, "limit", DataType::Int, Value::Null).unwrap(),
        )
        .unwrap();

        let result = run(&ctx, &leaf);
        assert_eq!(result.outcome, SUCCESS);
        assert_eq!(result.outputs["limit"], Value::Int(12));
    }
}
