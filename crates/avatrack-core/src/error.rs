//! Error types for the tracker and its configuration.

use thiserror::Error;

use crate::types::{AgentId, PartKind};

/// Failures surfaced to callers of the blocking tracker operations.
///
/// Absence is never an error: the non-blocking getters return `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The agent left (or the registry shut down) while the caller was
    /// waiting, or the call arrived after the tracker was destroyed.
    #[error("tracker for agent {agent} has ended")]
    LifecycleEnded { agent: AgentId },

    /// A wait-for-part exceeded the configured `part_wait_timeout_ms`.
    #[error("timed out after {waited_ms}ms waiting for {part}")]
    PartTimeout { part: PartKind, waited_ms: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
