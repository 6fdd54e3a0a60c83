//! Execution engine error types.

use crate::core::ModelError;
use thiserror::Error;

/// Errors returned by the engine's control surface.
///
/// Faults inside a running state never show up here; they become the
/// error outcome of that state.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A run of this engine or of the same machine is still active
    #[error("A run is already active")]
    AlreadyRunning,

    /// A control request arrived while no run is active
    #[error("No run is active")]
    NotRunning,

    /// The entry path does not name a state of the machine
    #[error("Entry path '{0}' does not name a state below the root")]
    InvalidEntryPath(String),

    /// An execution state refers to a script that was never registered
    #[error("State '{state}' refers to unregistered script '{script}'")]
    UnknownScript { state: String, script: String },

    /// The machine failed whole-tree validation
    #[error("Machine is invalid: {}", .violations.join("; "))]
    InvalidMachine { violations: Vec<String> },

    /// The engine configuration failed validation
    #[error("Invalid configuration: {}", .violations.join("; "))]
    InvalidConfig { violations: Vec<String> },

    /// The runner thread could not be started
    #[error("Failed to spawn runner thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The runner thread died outside of any state
    #[error("Runner thread panicked")]
    Panicked,

    #[error(transparent)]
    Model(#[from] ModelError),
}
