//! avatrack-core: pure types shared by the tracker and the runtime.
//! Identities, status, part kinds, animation options, configuration,
//! the error taxonomy and the initializer phase state machine.
//! No IO beyond reading a config file, no async.

pub mod config;
pub mod error;
pub mod phase;
pub mod types;

pub use config::TrackerConfig;
pub use error::{ConfigError, TrackerError};
pub use phase::InitPhase;
pub use types::{
    AgentId, AnimationClip, AnimationPriority, AnimationTrack, AvatarId, PartKind, PartRef,
    Status, TrackOptions, TrackerSnapshot,
};
