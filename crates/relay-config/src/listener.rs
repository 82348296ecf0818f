use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted `max_concurrency`
pub const MAX_LISTENER_CONCURRENCY: usize = 10_000;

/// Pull loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
#[serde(default)]
pub struct ListenerConfig {
    /// Maximum messages per pull
    pub batch_size: usize,
    /// Pause after an empty pull, in milliseconds
    pub poll_interval_ms: u64,
    /// Pause after a failed pull, in milliseconds
    pub error_backoff_ms: u64,
    /// Handler invocations allowed to overlap
    pub max_concurrency: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval_ms: 100,
            error_backoff_ms: 1000,
            max_concurrency: 1,
        }
    }
}

impl ListenerConfig {
    /// Get the poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the error backoff
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Validate the listener configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::ConfigError::validation(
                "listener",
                "batch_size must be > 0",
            ));
        }

        if !(1..=MAX_LISTENER_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(crate::ConfigError::validation(
                "listener",
                format!(
                    "max_concurrency must be between 1 and {}, got {}",
                    MAX_LISTENER_CONCURRENCY, self.max_concurrency
                ),
            ));
        }

        Ok(())
    }
}
