//! Build errors for the state builder.

use crate::core::ModelError;
use thiserror::Error;

/// Errors that can occur when building a state tree.
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error("Execution state '{0}' cannot own children, scoped variables, transitions or data flows")]
    NotAContainer(String),

    #[error("Hierarchy '{0}' has children but no start state. Call .start(id)")]
    MissingStartState(String),

    #[error("State '{state}' has no port named '{port}' usable as a data flow {end}")]
    UnknownPort {
        state: String,
        port: String,
        end: &'static str,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}
