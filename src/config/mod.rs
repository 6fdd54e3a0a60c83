//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data, loadable from JSON, with a fluent
//! [`EngineConfigBuilder`]. [`EngineConfig::validate`] uses `Validation` to
//! report ALL problems at once instead of stopping at the first one.
//!
//! # Example
//!
//! ```rust
//! use statecraft::config::EngineConfig;
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .history_limit(100)
//!     .lock_wait_timeout(Duration::from_secs(2))
//!     .build();
//! assert!(config.validate().is_success());
//!
//! let parsed = EngineConfig::from_json(r#"{ "checkpoint_interval_ms": 10 }"#).unwrap();
//! assert_eq!(parsed.checkpoint_interval(), Duration::from_millis(10));
//! assert!(parsed.execution_history);
//! ```

mod builder;
mod error;

pub use builder::EngineConfigBuilder;
pub use error::ConfigViolation;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 5;

/// Tunables of the execution engine and the editing history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of undo entries kept; `None` keeps all.
    pub history_limit: Option<usize>,
    /// Record state entries and exits for run reports and backward stepping.
    pub execution_history: bool,
    /// How often cancellation-aware sleeps in scripts check for preemption.
    pub checkpoint_interval_ms: u64,
    /// How long token-less global variable access waits for a locked key.
    pub lock_wait_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: None,
            execution_history: true,
            checkpoint_interval_ms: DEFAULT_CHECKPOINT_INTERVAL_MS,
            lock_wait_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigViolation> {
        serde_json::from_str(json).map_err(|e| ConfigViolation::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigViolation> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigViolation::Malformed(e.to_string()))
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn lock_wait_timeout(&self) -> Option<Duration> {
        self.lock_wait_timeout_ms.map(Duration::from_millis)
    }

    /// Check every field, accumulating ALL violations.
    pub fn validate(&self) -> Validation<(), NonEmptyVec<ConfigViolation>> {
        let checks = vec![
            if self.checkpoint_interval_ms == 0 {
                Validation::fail(ConfigViolation::ZeroCheckpointInterval)
            } else {
                Validation::success(())
            },
            if self.history_limit == Some(0) {
                Validation::fail(ConfigViolation::ZeroHistoryLimit)
            } else {
                Validation::success(())
            },
            if self.lock_wait_timeout_ms == Some(0) {
                Validation::fail(ConfigViolation::ZeroLockWaitTimeout)
            } else {
                Validation::success(())
            },
        ];
        Validation::all_vec(checks).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_success());
        assert_eq!(config.checkpoint_interval(), Duration::from_millis(5));
        assert_eq!(config.lock_wait_timeout(), None);
    }

    #[test]
    fn validation_accumulates_all_violations() {
        let config = EngineConfig {
            history_limit: Some(0),
            execution_history: true,
            checkpoint_interval_ms: 0,
            lock_wait_timeout_ms: Some(0),
        };

        match config.validate() {
            Validation::Failure(errors) => {
                assert_eq!(errors.len(), 3);
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ConfigViolation::ZeroCheckpointInterval)));
            }
            Validation::Success(_) => panic!("Expected failures, got success"),
        }
    }

    #[test]
    fn json_round_trip() {
        let config = EngineConfig::builder()
            .history_limit(10)
            .execution_history(false)
            .checkpoint_interval(Duration::from_millis(2))
            .build();
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigViolation::Malformed(_)));
    }
}
