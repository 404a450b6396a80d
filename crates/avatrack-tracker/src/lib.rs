//! avatrack-tracker: per-agent avatar readiness tracking.
//!
//! An [`AgentTracker`] owns one agent's alive/dead status, its current
//! avatar and at most one in-flight initializer. Attaching an avatar
//! starts an initializer that waits for world placement, resolves the
//! humanoid, settles, and promotes itself; superseding attaches, detaches
//! and tracker teardown abandon it through a cancellation token so it can
//! never deliver a stale transition. The [`TrackerRegistry`] maps agents
//! to trackers and is fed by [`AgentEvent`]s.

pub mod feed;
mod initializer;
pub mod registry;
pub mod sim;
pub mod tracker;
pub mod world;

pub use feed::{AgentEvent, RegistryDriver};
pub use registry::TrackerRegistry;
pub use sim::SimAvatar;
pub use tracker::{AgentTracker, StatusChange};
pub use world::{AvatarHandle, AvatarModel, WaitOutcome, wait_for_part, wait_until_placed};
