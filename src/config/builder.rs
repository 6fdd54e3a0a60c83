//! Builder API for engine configuration.

use super::EngineConfig;
use std::time::Duration;

/// Builder for [`EngineConfig`], starting from the defaults.
#[derive(Clone, Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` undo entries
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = Some(limit);
        self
    }

    /// Record state entries and exits during runs
    pub fn execution_history(mut self, enabled: bool) -> Self {
        self.config.execution_history = enabled;
        self
    }

    /// Polling granularity of cancellation-aware sleeps
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.config.checkpoint_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Give up waiting for a locked global variable after `timeout`
    pub fn lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_wait_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
