//! Scheduler configuration.
//!
//! Plain values handed in by the embedding application — this subsystem has
//! no file, env, or CLI surface of its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid scheduler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("concurrency_limit must be at least 1")]
    ZeroConcurrency,
}

/// Tuning knobs for the query scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum simultaneously in-flight transport calls.
    ///
    /// Required, no default: the backend's writer model decides it (1 for a
    /// single-writer engine), and guessing wrong either starves the engine
    /// or overwhelms it.
    pub concurrency_limit: usize,
    /// Priority subtracted from every query of the currently active subject.
    #[serde(default = "default_active_boost")]
    pub active_boost: i32,
    /// Additional priority subtracted when the query targets the focused column.
    #[serde(default = "default_field_boost")]
    pub field_boost: i32,
    /// Debounce delay in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Throttle delay in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Fast-path throttle delay in milliseconds.
    #[serde(default = "default_throttle_fast_ms")]
    pub throttle_fast_ms: u64,
}

fn default_active_boost() -> i32 {
    25
}
fn default_field_boost() -> i32 {
    10
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_throttle_ms() -> u64 {
    500
}
fn default_throttle_fast_ms() -> u64 {
    100
}

impl SchedulerConfig {
    /// Build a config with the given concurrency limit and default offsets.
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            active_boost: default_active_boost(),
            field_boost: default_field_boost(),
            debounce_ms: default_debounce_ms(),
            throttle_ms: default_throttle_ms(),
            throttle_fast_ms: default_throttle_fast_ms(),
        }
    }

    /// Check the config is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Throttle delay; `fast` selects the short re-schedule path.
    pub fn throttle_delay(&self, fast: bool) -> Duration {
        if fast {
            Duration::from_millis(self.throttle_fast_ms)
        } else {
            Duration::from_millis(self.throttle_ms)
        }
    }
}
