//! The unit of work of an execution state.

use super::control::Controller;
use crate::core::{OutcomeId, StatePath, Value};
use crate::globals::{GlobalVariableError, GlobalVariableManager};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a script did not produce an outcome.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The state was preempted or the run stopped; maps to the preempted outcome
    #[error("Interrupted by preemption or stop")]
    Interrupted,

    #[error("Script failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Globals(#[from] GlobalVariableError),
}

/// Work run by an execution state.
///
/// Returns the id of one of the state's outcomes. Errors and panics become
/// the error outcome; [`ScriptError::Interrupted`] becomes the preempted one.
/// Any `Fn(&mut ScriptContext) -> Result<OutcomeId, ScriptError>` closure is
/// a script.
pub trait Script: Send + Sync {
    fn execute(&self, ctx: &mut ScriptContext<'_>) -> Result<OutcomeId, ScriptError>;
}

impl<F> Script for F
where
    F: Fn(&mut ScriptContext<'_>) -> Result<OutcomeId, ScriptError> + Send + Sync,
{
    fn execute(&self, ctx: &mut ScriptContext<'_>) -> Result<OutcomeId, ScriptError> {
        self(ctx)
    }
}

/// Scripts by the name execution states refer to them with.
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: HashMap<String, Arc<dyn Script>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure as the script called `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, script: F) -> &mut Self
    where
        F: Fn(&mut ScriptContext<'_>) -> Result<OutcomeId, ScriptError> + Send + Sync + 'static,
    {
        self.register_script(name, script)
    }

    pub fn register_script(
        &mut self,
        name: impl Into<String>,
        script: impl Script + 'static,
    ) -> &mut Self {
        self.scripts.insert(name.into(), Arc::new(script));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, script: F) -> Self
    where
        F: Fn(&mut ScriptContext<'_>) -> Result<OutcomeId, ScriptError> + Send + Sync + 'static,
    {
        self.register(name, script);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Script>> {
        self.scripts.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }
}

impl fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ScriptRegistry").field("scripts", &names).finish()
    }
}

/// What a script sees: its inputs, its outputs to fill, the global variables
/// and the cooperative preemption flag.
pub struct ScriptContext<'a> {
    pub(crate) path: &'a StatePath,
    pub(crate) inputs: BTreeMap<String, Value>,
    pub(crate) outputs: BTreeMap<String, Value>,
    pub(crate) globals: &'a GlobalVariableManager,
    pub(crate) token: &'a CancellationToken,
    pub(crate) controller: &'a Controller,
    pub(crate) interval: Duration,
}

impl<'a> ScriptContext<'a> {
    /// Path of the executing state.
    pub fn path(&self) -> &StatePath {
        self.path
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.outputs.insert(name.into(), value.into());
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    pub fn globals(&self) -> &GlobalVariableManager {
        self.globals
    }

    /// True once this state has been asked to stop.
    pub fn is_preempted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Explicit check point: waits while the engine is paused and fails with
    /// [`ScriptError::Interrupted`] once the state is preempted or stopped.
    pub fn checkpoint(&self) -> Result<(), ScriptError> {
        self.controller
            .hold(self.token)
            .map_err(|_| ScriptError::Interrupted)
    }

    /// Sleep for `duration`, returning early with `Interrupted` on preemption.
    pub fn sleep(&self, duration: Duration) -> Result<(), ScriptError> {
        let deadline = Instant::now() + duration;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(self.interval.min(deadline - now));
        }
    }
}
