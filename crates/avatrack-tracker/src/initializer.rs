//! Avatar initializer: drives one freshly attached avatar to readiness.
//!
//! Protocol: wait for world placement, resolve the humanoid and subscribe
//! to its health, settle, then hand the avatar back to the tracker for
//! promotion. Every suspension point races the initializer's
//! [`CancellationToken`]; the promotion itself re-checks generation and
//! phase under the tracker lock, so an abandoned initializer can never
//! promote or fire an event.

use std::sync::{Arc, Weak};

use avatrack_core::{AgentId, InitPhase, PartKind, PartRef, TrackerConfig};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tracker::TrackerShared;
use crate::world::{AvatarHandle, WaitOutcome, wait_for_part, wait_until_placed};

/// The tracker's side of an in-flight initializer.
pub(crate) struct InitializerHandle {
    pub(crate) generation: u64,
    pub(crate) avatar: AvatarHandle,
    pub(crate) cancel: CancellationToken,
    phase: Arc<Mutex<InitPhase>>,
    /// Non-positive health was reported before promotion.
    pub(crate) died_early: bool,
}

impl InitializerHandle {
    pub(crate) fn phase(&self) -> InitPhase {
        *self.phase.lock()
    }

    /// Mark the initializer abandoned and stop its task. Idempotent.
    ///
    /// Returns whether this call did the abandoning.
    pub(crate) fn abandon(&self) -> bool {
        let changed = self.phase.lock().advance(InitPhase::Abandoned);
        self.cancel.cancel();
        changed
    }

    /// Move to `Ready` unless already abandoned.
    pub(crate) fn mark_ready(&self) -> bool {
        !self.cancel.is_cancelled() && self.phase.lock().advance(InitPhase::Ready)
    }
}

/// Task state of one initializer run.
pub(crate) struct AvatarInitializer {
    tracker: Weak<TrackerShared>,
    agent: AgentId,
    avatar: AvatarHandle,
    generation: u64,
    config: Arc<TrackerConfig>,
    cancel: CancellationToken,
    phase: Arc<Mutex<InitPhase>>,
}

impl AvatarInitializer {
    /// Spawn the initializer task and return the handle the tracker keeps.
    pub(crate) fn start(
        tracker: Weak<TrackerShared>,
        agent: AgentId,
        avatar: AvatarHandle,
        generation: u64,
        config: Arc<TrackerConfig>,
        cancel: CancellationToken,
    ) -> InitializerHandle {
        let phase = Arc::new(Mutex::new(InitPhase::Starting));
        let init = Self {
            tracker,
            agent,
            avatar: Arc::clone(&avatar),
            generation,
            config,
            cancel: cancel.clone(),
            phase: Arc::clone(&phase),
        };
        tokio::spawn(init.run());
        InitializerHandle {
            generation,
            avatar,
            cancel,
            phase,
            died_early: false,
        }
    }

    async fn run(self) {
        let avatar_id = self.avatar.id().clone();
        debug!(agent = %self.agent, avatar = %avatar_id, generation = self.generation, "initializer started");

        if !wait_until_placed(&*self.avatar, self.config.placement_poll(), &self.cancel).await
        {
            debug!(agent = %self.agent, avatar = %avatar_id, "initializer abandoned before placement");
            return;
        }
        if !self.phase.lock().advance(InitPhase::LocatingParts) {
            return;
        }
        debug!(agent = %self.agent, avatar = %avatar_id, "avatar placed, locating parts");

        let humanoid = match wait_for_part(
            &*self.avatar,
            PartKind::Humanoid,
            self.config.part_poll(),
            self.config.part_wait_timeout(),
            &self.cancel,
        )
        .await
        {
            WaitOutcome::Found(part) => part,
            WaitOutcome::Cancelled => {
                debug!(agent = %self.agent, avatar = %avatar_id, "initializer abandoned while locating humanoid");
                return;
            }
            WaitOutcome::TimedOut { waited } => {
                warn!(
                    agent = %self.agent,
                    avatar = %avatar_id,
                    waited_ms = waited.as_millis() as u64,
                    "humanoid never appeared, abandoning initializer"
                );
                if let Some(tracker) = self.tracker.upgrade() {
                    tracker.initializer_failed(self.generation);
                }
                return;
            }
        };

        // Lives as long as the token: through promotion until the avatar is
        // destroyed, or until abandonment.
        let health_rx = self.avatar.subscribe_health(&humanoid);
        tokio::spawn(monitor_health(
            self.tracker.clone(),
            self.agent.clone(),
            self.generation,
            health_rx,
            self.cancel.clone(),
        ));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(agent = %self.agent, avatar = %avatar_id, "initializer abandoned during settle delay");
                return;
            }
            _ = tokio::time::sleep(self.config.settle_delay()) => {}
        }

        let Some(tracker) = self.tracker.upgrade() else {
            self.cancel.cancel();
            return;
        };
        if !tracker.promote(self.generation, humanoid) {
            debug!(agent = %self.agent, avatar = %avatar_id, "promotion rejected, initializer superseded");
        }
    }
}

/// Forward non-positive health reports to the owning tracker until the
/// avatar's token is cancelled or the stream closes.
async fn monitor_health(
    tracker: Weak<TrackerShared>,
    agent: AgentId,
    generation: u64,
    mut health_rx: broadcast::Receiver<f64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            report = health_rx.recv() => match report {
                Ok(health) if health <= 0.0 => {
                    let Some(tracker) = tracker.upgrade() else { break };
                    tracker.avatar_died(generation);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(agent = %agent, generation, skipped, "health stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(agent = %agent, generation, "health stream closed");
                    break;
                }
            }
        }
    }
}

/// The avatar that completed initialization and backs the getters.
pub(crate) struct CurrentAvatar {
    pub(crate) generation: u64,
    pub(crate) avatar: AvatarHandle,
    parts: Vec<PartRef>,
    cancel: CancellationToken,
}

impl CurrentAvatar {
    pub(crate) fn new(
        generation: u64,
        avatar: AvatarHandle,
        humanoid: PartRef,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            generation,
            avatar,
            parts: vec![humanoid],
            cancel,
        }
    }

    /// Cached part, or a non-blocking lookup that is cached on success.
    pub(crate) fn part(&mut self, kind: PartKind) -> Option<PartRef> {
        if let Some(part) = self.parts.iter().find(|p| p.kind == kind) {
            return Some(part.clone());
        }
        let part = self.avatar.find_part(kind)?;
        self.parts.push(part.clone());
        Some(part)
    }

    /// Stop the health monitor and release the avatar's subscriptions.
    pub(crate) fn destroy(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CurrentAvatar {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
