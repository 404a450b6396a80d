//! Tracker tuning, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Default settle delay: one frame at 30 fps.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 33;

/// Default polling interval for placement, part and lookup waits (~60 Hz).
pub const DEFAULT_POLL_MS: u64 = 16;

/// Default buffer for each notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Debounce between locating the humanoid and declaring readiness.
    pub settle_delay_ms: u64,
    /// How often to re-check whether an attached avatar is in the world.
    pub placement_poll_ms: u64,
    /// How often to re-check for a missing part while waiting on it.
    pub part_poll_ms: u64,
    /// Upper bound for a wait-for-part. `None` waits indefinitely.
    pub part_wait_timeout_ms: Option<u64>,
    /// Fallback poll interval for `await_lookup`.
    pub lookup_poll_ms: u64,
    /// Buffer size of the on-died / on-spawned broadcast channels.
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            placement_poll_ms: DEFAULT_POLL_MS,
            part_poll_ms: DEFAULT_POLL_MS,
            part_wait_timeout_ms: None,
            lookup_poll_ms: DEFAULT_POLL_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TrackerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.placement_poll_ms == 0 {
            return Err(ConfigError::Invalid("placement_poll_ms must be > 0".into()));
        }
        if self.part_poll_ms == 0 {
            return Err(ConfigError::Invalid("part_poll_ms must be > 0".into()));
        }
        if self.lookup_poll_ms == 0 {
            return Err(ConfigError::Invalid("lookup_poll_ms must be > 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn placement_poll(&self) -> Duration {
        Duration::from_millis(self.placement_poll_ms)
    }

    pub fn part_poll(&self) -> Duration {
        Duration::from_millis(self.part_poll_ms)
    }

    pub fn part_wait_timeout(&self) -> Option<Duration> {
        self.part_wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn lookup_poll(&self) -> Duration {
        Duration::from_millis(self.lookup_poll_ms)
    }
}
