//! Configuration violations.

use thiserror::Error;

/// A problem found while validating an [`EngineConfig`](super::EngineConfig).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigViolation {
    #[error("Checkpoint interval must be greater than zero")]
    ZeroCheckpointInterval,

    #[error("History limit must be greater than zero when set")]
    ZeroHistoryLimit,

    #[error("Lock wait timeout must be greater than zero when set")]
    ZeroLockWaitTimeout,

    #[error("Invalid configuration document: {0}")]
    Malformed(String),
}
