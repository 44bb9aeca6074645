use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatcher tuning. Every field has a default, so a partial JSON/TOML
/// document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Wall-clock budget of one tool run.
    pub executor_timeout_ms: u64,
    /// Budget of one resolver attempt.
    pub resolver_timeout_ms: u64,
    /// Resolver attempts before giving up. Only timeouts are retried.
    pub resolver_max_attempts: u32,
    /// Reject mutations whose base version is already behind before running them.
    pub stale_precheck: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            executor_timeout_ms: 10_000,
            resolver_timeout_ms: 5_000,
            resolver_max_attempts: 3,
            stale_precheck: true,
        }
    }
}

impl DispatcherConfig {
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver_timeout_ms)
    }
}
