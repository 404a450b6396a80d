//! AvatarModel trait: the engine object-model boundary.
//!
//! The tracker never reaches into the engine directly. Everything it needs
//! from an avatar (placement, part lookup, health stream, animation load)
//! goes through this trait so tests can inject [`crate::sim::SimAvatar`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use avatrack_core::{AnimationClip, AnimationTrack, AvatarId, PartKind, PartRef};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An externally owned avatar instance.
///
/// All methods are non-blocking; waiting is layered on top by polling
/// (see [`wait_until_placed`] and [`wait_for_part`]).
pub trait AvatarModel: fmt::Debug + Send + Sync + 'static {
    fn id(&self) -> &AvatarId;

    /// Whether the avatar has been placed into the active world.
    fn is_in_world(&self) -> bool;

    /// Look up a part without waiting. `None` if it has not appeared yet.
    fn find_part(&self, kind: PartKind) -> Option<PartRef>;

    /// Subscribe to health reports from the given humanoid.
    ///
    /// Dropping the receiver is the unsubscribe.
    fn subscribe_health(&self, humanoid: &PartRef) -> broadcast::Receiver<f64>;

    /// Load a clip onto an animator belonging to this avatar.
    fn load_animation(&self, animator: &PartRef, clip: &AnimationClip) -> AnimationTrack {
        AnimationTrack::new(clip.clone(), animator.clone())
    }
}

/// Shared handle to an avatar, as handed out by the tracker.
pub type AvatarHandle = Arc<dyn AvatarModel>;

/// Result of a cancellable wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Found(T),
    Cancelled,
    TimedOut { waited: Duration },
}

/// Poll until the avatar is in the world or `cancel` fires.
///
/// Returns `false` when cancelled. There is no timeout: placement is
/// bounded only by the engine.
pub async fn wait_until_placed(
    avatar: &dyn AvatarModel,
    poll: Duration,
    cancel: &CancellationToken,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if avatar.is_in_world() {
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Poll for a part until it appears, `cancel` fires or `timeout` elapses.
pub async fn wait_for_part(
    avatar: &dyn AvatarModel,
    kind: PartKind,
    poll: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> WaitOutcome<PartRef> {
    let start = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        if let Some(part) = avatar.find_part(kind) {
            return WaitOutcome::Found(part);
        }
        if let Some(limit) = timeout {
            let waited = start.elapsed();
            if waited >= limit {
                return WaitOutcome::TimedOut { waited };
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            _ = tokio::time::sleep(poll) => {}
        }
    }
}
