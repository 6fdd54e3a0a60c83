//! Errors raised by structural edits of the state model.

use super::ids::{DataFlowId, PortId, StateId};
use super::value::{DataType, Value};
use thiserror::Error;

/// Errors that can occur when building or editing a state hierarchy.
///
/// Editing operations are synchronous, so every misuse is reported to the
/// caller immediately and leaves the hierarchy untouched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Type mismatch: {from} cannot flow into {to}")]
    TypeMismatch { from: DataType, to: DataType },

    #[error("Port {port} of state '{state}' is already the target of data flow {data_flow}")]
    PortBusy {
        state: StateId,
        port: PortId,
        data_flow: DataFlowId,
    },

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Invalid child: {0}")]
    InvalidChild(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State '{0}' cannot be ungrouped")]
    NotUngroupable(String),

    #[error("State machine is running; stop it before editing")]
    MachineRunning,

    #[error("Default value {value:?} does not satisfy data type {data_type}")]
    InvalidDefault { value: Value, data_type: DataType },

    #[error("Unknown data type '{0}'")]
    UnknownDataType(String),
}
