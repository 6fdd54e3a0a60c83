//! Execution of state machines.
//!
//! [`ExecutionEngine::start`] validates a machine, snapshots its tree and runs
//! it on a dedicated thread; the returned [`RunHandle`] yields the
//! [`RunReport`]. Control requests (`pause`, `step_*`, `run_to`, `stop`) only
//! change the engine's mode. Every executing branch honours the new mode at
//! its next suspension point: before a child is entered, at a script check
//! point, or at a concurrency join.
//!
//! # Example
//!
//! ```rust
//! use statecraft::core::{State, StatePath, SUCCESS};
//! use statecraft::engine::{ExecutionEngine, ScriptRegistry};
//! use statecraft::machine::StateMachine;
//!
//! let scripts = ScriptRegistry::new().with("noop", |_| Ok(SUCCESS));
//! let engine = ExecutionEngine::new(scripts);
//!
//! let mut machine = StateMachine::new(State::hierarchy("ROOT", "root"));
//! let root = machine.root_path();
//! machine.add_state(&root, State::execution("A", "a", "noop")).unwrap();
//! machine.set_start_state(&root, Some("A".into())).unwrap();
//! machine.add_transition(&root, "A", SUCCESS, "ROOT", Some(SUCCESS)).unwrap();
//!
//! let report = engine.start(&machine).unwrap().join().unwrap();
//! assert_eq!(report.final_outcome, SUCCESS);
//! assert_eq!(report.outcome_of(&root.child("A")), Some(SUCCESS));
//! ```

mod control;
mod error;
mod history;
mod runner;
mod script;

pub use control::{ExecutionMode, StepKind};
pub use error::ExecutionError;
pub use history::{ExecutionEvent, ExecutionHistory, ExecutionRecord, RunReport, StateStatus};
pub use runner::barrier_decision;
pub use script::{Script, ScriptContext, ScriptError, ScriptRegistry};

use crate::config::EngineConfig;
use crate::core::{State, StateId, StatePath};
use crate::globals::GlobalVariableManager;
use crate::hierarchy::validate_all;
use crate::machine::{RunGuard, StateMachine};
use control::Controller;
use history::Monitor;
use parking_lot::Mutex;
use runner::RunContext;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use stillwater::validation::Validation;
use tracing::{info, info_span};

/// Runs state machines, one at a time.
#[derive(Debug)]
pub struct ExecutionEngine {
    globals: Arc<GlobalVariableManager>,
    scripts: Arc<ScriptRegistry>,
    config: EngineConfig,
    active: Mutex<Option<Arc<Controller>>>,
}

impl ExecutionEngine {
    /// Engine with the default configuration and a fresh global variable store.
    pub fn new(scripts: ScriptRegistry) -> Self {
        Self::assemble(scripts, EngineConfig::default())
    }

    /// Engine with a validated configuration. Every violation is reported.
    pub fn with_config(scripts: ScriptRegistry, config: EngineConfig) -> Result<Self, ExecutionError> {
        match config.validate() {
            Validation::Success(_) => Ok(Self::assemble(scripts, config)),
            Validation::Failure(errors) => Err(ExecutionError::InvalidConfig {
                violations: errors.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    fn assemble(scripts: ScriptRegistry, config: EngineConfig) -> Self {
        Self {
            globals: Arc::new(GlobalVariableManager::with_wait_timeout(
                config.lock_wait_timeout(),
            )),
            scripts: Arc::new(scripts),
            config,
            active: Mutex::new(None),
        }
    }

    /// Share an existing global variable store instead of the engine's own.
    pub fn with_globals(mut self, globals: Arc<GlobalVariableManager>) -> Self {
        self.globals = globals;
        self
    }

    pub fn globals(&self) -> &Arc<GlobalVariableManager> {
        &self.globals
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        &self.scripts
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `machine` from its root's start state.
    pub fn start(&self, machine: &StateMachine) -> Result<RunHandle, ExecutionError> {
        self.start_with(machine, None, ExecutionMode::Running)
    }

    /// Run `machine` starting at the state at `entry` instead of the start states
    /// on the way down to it.
    pub fn start_at(&self, machine: &StateMachine, entry: &StatePath) -> Result<RunHandle, ExecutionError> {
        self.start_with(machine, Some(entry), ExecutionMode::Running)
    }

    /// Run `machine` in the given initial mode, e.g. [`ExecutionMode::Stepping`]
    /// to stop before the first state.
    ///
    /// The machine rejects edits until the run concludes.
    pub fn start_with(
        &self,
        machine: &StateMachine,
        entry: Option<&StatePath>,
        mode: ExecutionMode,
    ) -> Result<RunHandle, ExecutionError> {
        let guard = machine.begin_run().ok_or(ExecutionError::AlreadyRunning)?;
        self.launch(machine.root().clone(), entry, mode, Some(guard))
    }

    /// Run a materialized tree handed over by an external loader.
    pub fn start_root(&self, root: State, entry: Option<&StatePath>) -> Result<RunHandle, ExecutionError> {
        self.launch(root, entry, ExecutionMode::Running, None)
    }

    fn launch(
        &self,
        root: State,
        entry: Option<&StatePath>,
        mode: ExecutionMode,
        guard: Option<RunGuard>,
    ) -> Result<RunHandle, ExecutionError> {
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|c| !matches!(c.mode(), ExecutionMode::Stopped | ExecutionMode::Finished))
        {
            return Err(ExecutionError::AlreadyRunning);
        }
        self.check(&root)?;
        let entry_ids = entry_ids(&root, entry)?;

        let controller = Arc::new(Controller::new(mode));
        let monitor = Arc::new(Monitor::new(self.config.execution_history));
        let ctx = RunContext {
            globals: Arc::clone(&self.globals),
            scripts: Arc::clone(&self.scripts),
            controller: Arc::clone(&controller),
            monitor: Arc::clone(&monitor),
            interval: self.config.checkpoint_interval(),
            backward_trail: self.config.execution_history,
        };
        let root_path = StatePath::root(root.id());
        info!(root = %root_path, ?mode, "starting run");

        let thread = thread::Builder::new()
            .name(format!("statecraft-{}", root.id()))
            .spawn(move || {
                let _guard = guard;
                let span = info_span!("run", root = %root_path);
                let _entered = span.enter();
                let token = ctx.controller.stop_token().child_token();
                let result =
                    runner::run_state(&ctx, &root, &root_path, BTreeMap::new(), &entry_ids, &token);
                ctx.controller.finish();
                info!(outcome = result.outcome, "run concluded");
                ctx.monitor.report(result.outcome, result.outputs)
            })?;

        *active = Some(Arc::clone(&controller));
        Ok(RunHandle {
            thread,
            controller,
            monitor,
        })
    }

    /// Pre-run checks: whole-tree validation and script availability.
    fn check(&self, root: &State) -> Result<(), ExecutionError> {
        validate_all(root).map_err(|violations| ExecutionError::InvalidMachine {
            violations: violations.iter().map(ToString::to_string).collect(),
        })?;
        for (path, state) in root.walk(&StatePath::root(root.id())) {
            if let Some(script) = state.script() {
                if !self.scripts.contains(script) {
                    return Err(ExecutionError::UnknownScript {
                        state: path.to_string(),
                        script: script.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn controller(&self) -> Result<Arc<Controller>, ExecutionError> {
        self.active.lock().clone().ok_or(ExecutionError::NotRunning)
    }

    fn command(
        &self,
        name: &'static str,
        request: impl FnOnce(&Controller) -> bool,
    ) -> Result<(), ExecutionError> {
        let controller = self.controller()?;
        if request(&controller) {
            info!(command = name, "execution command");
            Ok(())
        } else {
            Err(ExecutionError::NotRunning)
        }
    }

    /// Hold every branch at its next suspension point.
    pub fn pause(&self) -> Result<(), ExecutionError> {
        self.command("pause", Controller::pause)
    }

    /// Continue running freely from Paused or Stepping.
    pub fn resume(&self) -> Result<(), ExecutionError> {
        self.command("resume", Controller::resume)
    }

    /// Switch to stepping; branches stop at their next suspension point.
    pub fn step_mode(&self) -> Result<(), ExecutionError> {
        self.command("step_mode", Controller::step_mode)
    }

    pub fn step_into(&self) -> Result<(), ExecutionError> {
        self.command("step_into", |c| c.step(StepKind::Into))
    }

    pub fn step_over(&self) -> Result<(), ExecutionError> {
        self.command("step_over", |c| c.step(StepKind::Over))
    }

    pub fn step_out(&self) -> Result<(), ExecutionError> {
        self.command("step_out", |c| c.step(StepKind::Out))
    }

    /// Re-enter the previously executed sibling of the waiting state.
    pub fn backward_step(&self) -> Result<(), ExecutionError> {
        self.command("backward_step", |c| c.step(StepKind::Backward))
    }

    /// Run until the state at `path` is about to be entered, then pause.
    pub fn run_to(&self, path: &StatePath) -> Result<(), ExecutionError> {
        let target = path.clone();
        self.command("run_to", move |c| c.run_to(target))
    }

    /// Ask every branch to stop at its next check point.
    pub fn stop(&self) -> Result<(), ExecutionError> {
        let controller = self.controller()?;
        if matches!(controller.mode(), ExecutionMode::Stopped | ExecutionMode::Finished) {
            return Err(ExecutionError::NotRunning);
        }
        info!("stopping run");
        controller.stop();
        Ok(())
    }

    /// Mode of the current or last run, `None` before the first run.
    pub fn mode(&self) -> Option<ExecutionMode> {
        self.active.lock().as_ref().map(|c| c.mode())
    }

    /// The state a stepping run is waiting in front of.
    pub fn stopped_at(&self) -> Option<StatePath> {
        self.active.lock().as_ref().and_then(|c| c.stopped_at())
    }
}

fn entry_ids(root: &State, entry: Option<&StatePath>) -> Result<Vec<StateId>, ExecutionError> {
    let Some(path) = entry else {
        return Ok(Vec::new());
    };
    if path.depth() == 0 || root.find(path).is_none() {
        return Err(ExecutionError::InvalidEntryPath(path.to_string()));
    }
    Ok(path.ids()[1..].to_vec())
}

/// A run in progress.
#[derive(Debug)]
pub struct RunHandle {
    thread: JoinHandle<RunReport>,
    controller: Arc<Controller>,
    monitor: Arc<Monitor>,
}

impl RunHandle {
    /// Wait for the run to conclude.
    pub fn join(self) -> Result<RunReport, ExecutionError> {
        self.thread.join().map_err(|_| ExecutionError::Panicked)
    }

    /// Live status of the state at `path`.
    pub fn status(&self, path: &StatePath) -> StateStatus {
        self.monitor.status(path)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.controller.mode()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ABORTED, SUCCESS};

    fn single_leaf(script: &str) -> StateMachine {
        let mut machine = StateMachine::new(State::hierarchy("ROOT", "root"));
        let root = machine.root_path();
        machine
            .add_state(&root, State::execution("A", "a", script))
            .unwrap();
        machine.set_start_state(&root, Some("A".into())).unwrap();
        machine
            .add_transition(&root, "A", SUCCESS, "ROOT", Some(SUCCESS))
            .unwrap();
        machine
            .add_transition(&root, "A", ABORTED, "ROOT", Some(ABORTED))
            .unwrap();
        machine
    }

    #[test]
    fn unknown_scripts_are_caught_before_running() {
        let engine = ExecutionEngine::new(ScriptRegistry::new());
        let machine = single_leaf("missing");
        assert!(matches!(
            engine.start(&machine),
            Err(ExecutionError::UnknownScript { .. })
        ));
        assert!(!machine.is_running());
    }

    #[test]
    fn invalid_entry_path_is_rejected() {
        let engine = ExecutionEngine::new(ScriptRegistry::new().with("noop", |_| Ok(SUCCESS)));
        let machine = single_leaf("noop");
        let entry = machine.root_path().child("NOPE");
        assert!(matches!(
            engine.start_at(&machine, &entry),
            Err(ExecutionError::InvalidEntryPath(_))
        ));
    }

    #[test]
    fn control_requires_a_run() {
        let engine = ExecutionEngine::new(ScriptRegistry::new());
        assert!(matches!(engine.pause(), Err(ExecutionError::NotRunning)));
        assert_eq!(engine.mode(), None);
    }

    #[test]
    fn machine_is_locked_while_running() {
        let engine = ExecutionEngine::new(ScriptRegistry::new().with("noop", |_| Ok(SUCCESS)));
        let mut machine = single_leaf("noop");
        let handle = engine
            .start_with(&machine, None, ExecutionMode::Paused)
            .unwrap();
        assert!(machine.is_running());
        assert!(matches!(
            engine.start(&machine),
            Err(ExecutionError::AlreadyRunning)
        ));

        engine.resume().unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.final_outcome, SUCCESS);
        assert_eq!(engine.mode(), Some(ExecutionMode::Finished));
        assert!(machine.rename(&machine.root_path(), "edited").is_ok());
    }

    #[test]
    fn invalid_config_is_reported() {
        let config = EngineConfig {
            checkpoint_interval_ms: 0,
            history_limit: Some(0),
            ..EngineConfig::default()
        };
        match ExecutionEngine::with_config(ScriptRegistry::new(), config) {
            Err(ExecutionError::InvalidConfig { violations }) => assert_eq!(violations.len(), 2),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }
}
