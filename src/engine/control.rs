//! Run-mode control shared by the engine and every executing branch.
//!
//! Branches call [`Controller::suspend`] at each suspension point (before a
//! child is entered) and [`Controller::hold`] at leaf check points and
//! concurrency joins. Requests from the engine only change the shared mode;
//! they take effect when a branch next reaches one of those points.

use crate::core::StatePath;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often a blocked branch re-checks its own cancellation token.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Control mode of an execution engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    Running,
    Paused,
    Stepping,
    Stopped,
    Finished,
}

/// Granularity of the next step in [`ExecutionMode::Stepping`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Stop at the next suspension point at any depth.
    Into,
    /// Stop at the next suspension point at the same or a shallower depth.
    Over,
    /// Stop at the next suspension point above the current depth.
    Out,
    /// Re-enter the previously executed sibling.
    Backward,
}

/// What a branch does after a suspension point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resume {
    Forward,
    Backward,
}

/// The branch must stop: the run was stopped or the branch was preempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interrupted;

#[derive(Debug)]
struct ControlState {
    mode: ExecutionMode,
    step: Option<StepKind>,
    /// Depth of the suspension point the pending step was issued from.
    origin_depth: usize,
    /// Depth and path of the last point a stepping branch stopped at.
    stopped_depth: usize,
    stopped_at: Option<StatePath>,
    run_to: Option<StatePath>,
    /// Bumped by every command so blocked branches notice it.
    epoch: u64,
}

#[derive(Debug)]
pub(crate) struct Controller {
    state: Mutex<ControlState>,
    changed: Condvar,
    stop: CancellationToken,
}

impl Controller {
    pub(crate) fn new(mode: ExecutionMode) -> Self {
        Self {
            state: Mutex::new(ControlState {
                mode,
                step: None,
                origin_depth: 0,
                stopped_depth: 0,
                stopped_at: None,
                run_to: None,
                epoch: 0,
            }),
            changed: Condvar::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Token cancelled when the run is stopped; branch tokens derive from it.
    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub(crate) fn mode(&self) -> ExecutionMode {
        self.state.lock().mode
    }

    /// Where a stepping branch is currently waiting, if any.
    pub(crate) fn stopped_at(&self) -> Option<StatePath> {
        self.state.lock().stopped_at.clone()
    }

    fn command(&self, apply: impl FnOnce(&mut ControlState)) -> bool {
        let mut state = self.state.lock();
        if matches!(state.mode, ExecutionMode::Stopped | ExecutionMode::Finished) {
            return false;
        }
        apply(&mut state);
        state.epoch += 1;
        drop(state);
        self.changed.notify_all();
        true
    }

    pub(crate) fn pause(&self) -> bool {
        self.command(|s| s.mode = ExecutionMode::Paused)
    }

    pub(crate) fn resume(&self) -> bool {
        self.command(|s| {
            s.mode = ExecutionMode::Running;
            s.step = None;
        })
    }

    pub(crate) fn step_mode(&self) -> bool {
        self.command(|s| {
            s.mode = ExecutionMode::Stepping;
            s.step = None;
        })
    }

    pub(crate) fn step(&self, kind: StepKind) -> bool {
        self.command(|s| {
            s.mode = ExecutionMode::Stepping;
            s.origin_depth = s.stopped_depth;
            s.step = Some(kind);
        })
    }

    pub(crate) fn run_to(&self, target: StatePath) -> bool {
        self.command(|s| {
            s.mode = ExecutionMode::Running;
            s.step = None;
            s.run_to = Some(target);
        })
    }

    pub(crate) fn stop(&self) {
        self.state.lock().mode = ExecutionMode::Stopped;
        self.stop.cancel();
        self.changed.notify_all();
    }

    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        if state.mode != ExecutionMode::Stopped {
            state.mode = ExecutionMode::Finished;
        }
        state.stopped_at = None;
        drop(state);
        self.changed.notify_all();
    }

    /// Suspension point before the state at `path` is entered.
    pub(crate) fn suspend(
        &self,
        path: &StatePath,
        token: &CancellationToken,
    ) -> Result<Resume, Interrupted> {
        let depth = path.depth();
        let mut state = self.state.lock();
        if state.run_to.as_ref() == Some(path) {
            info!(path = %path, "reached run-to target, pausing");
            state.run_to = None;
            state.mode = ExecutionMode::Paused;
        }

        loop {
            if token.is_cancelled() {
                return Err(Interrupted);
            }
            match state.mode {
                ExecutionMode::Running => return Ok(Resume::Forward),
                ExecutionMode::Stopped | ExecutionMode::Finished => return Err(Interrupted),
                ExecutionMode::Paused => {
                    self.changed.wait_for(&mut state, POLL_INTERVAL);
                }
                ExecutionMode::Stepping => {
                    let stop_here = match state.step {
                        None | Some(StepKind::Into) | Some(StepKind::Backward) => true,
                        Some(StepKind::Over) => depth <= state.origin_depth,
                        Some(StepKind::Out) => depth < state.origin_depth,
                    };
                    if !stop_here {
                        return Ok(Resume::Forward);
                    }

                    state.step = None;
                    state.stopped_depth = depth;
                    state.stopped_at = Some(path.clone());
                    debug!(path = %path, "stepping, waiting for the next command");
                    let epoch = state.epoch;
                    while state.epoch == epoch {
                        if token.is_cancelled() {
                            return Err(Interrupted);
                        }
                        self.changed.wait_for(&mut state, POLL_INTERVAL);
                    }
                    state.stopped_at = None;

                    match (state.mode, state.step) {
                        (ExecutionMode::Stepping, Some(StepKind::Backward)) => {
                            state.step = None;
                            return Ok(Resume::Backward);
                        }
                        (ExecutionMode::Stepping, _) | (ExecutionMode::Running, _) => {
                            return Ok(Resume::Forward)
                        }
                        _ => continue,
                    }
                }
            }
        }
    }

    /// Check point inside a leaf or at a join: waits while paused.
    pub(crate) fn hold(&self, token: &CancellationToken) -> Result<(), Interrupted> {
        let mut state = self.state.lock();
        loop {
            if token.is_cancelled() {
                return Err(Interrupted);
            }
            match state.mode {
                ExecutionMode::Paused => {
                    self.changed.wait_for(&mut state, POLL_INTERVAL);
                }
                ExecutionMode::Stopped => return Err(Interrupted),
                _ => return Ok(()),
            }
        }
    }
}
