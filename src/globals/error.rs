//! Global variable error types.

use thiserror::Error;

/// Misuse of the global variable manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GlobalVariableError {
    /// The key is locked under a different access token
    #[error("Global variable '{key}' is locked by another access token")]
    LockConflict { key: String },

    /// The token presented to `unlock` does not hold the lock
    #[error("Access token does not hold the lock on global variable '{key}'")]
    WrongToken { key: String },

    /// A reference was requested for a value stored by copy
    #[error("Global variable '{key}' is not stored by reference")]
    NotReferenceable { key: String },

    #[error("Global variable '{key}' does not exist")]
    NotFound { key: String },
}
