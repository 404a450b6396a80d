//! Per-agent tracker: status, current avatar, in-flight initializer and
//! the on-died / on-spawned channels.
//!
//! All fields live behind one short-lived lock that is never held across
//! an `.await`, so every transition (including its event dispatch) is a
//! single atomic step as seen by callers and by initializer tasks.

use std::sync::Arc;

use avatrack_core::{
    AgentId, AnimationClip, AnimationTrack, AvatarId, InitPhase, PartKind, PartRef, Status,
    TrackOptions, TrackerConfig, TrackerError, TrackerSnapshot,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::initializer::{AvatarInitializer, CurrentAvatar, InitializerHandle};
use crate::world::{AvatarHandle, WaitOutcome, wait_for_part};

/// Payload of the on-died / on-spawned channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub agent: AgentId,
    pub status: Status,
    /// Avatar current at the time of the change, if any.
    pub avatar: Option<AvatarId>,
    pub at: DateTime<Utc>,
}

struct TrackerState {
    status: Status,
    current: Option<CurrentAvatar>,
    pending: Option<InitializerHandle>,
    generation: u64,
    /// `None` once the tracker is destroyed; dropping them closes every
    /// outstanding receiver.
    died_tx: Option<broadcast::Sender<StatusChange>>,
    spawned_tx: Option<broadcast::Sender<StatusChange>>,
    last_transition: Option<DateTime<Utc>>,
}

impl TrackerState {
    fn ended(&self) -> bool {
        self.spawned_tx.is_none()
    }
}

pub(crate) struct TrackerShared {
    agent: AgentId,
    config: Arc<TrackerConfig>,
    /// Parent of every initializer token.
    cancel: CancellationToken,
    state: Mutex<TrackerState>,
}

impl Drop for TrackerShared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Tracks one agent's avatar readiness. Cheap to clone.
#[derive(Clone)]
pub struct AgentTracker {
    shared: Arc<TrackerShared>,
}

impl std::fmt::Debug for AgentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTracker")
            .field("agent", &self.shared.agent)
            .field("status", &self.status())
            .finish()
    }
}

impl AgentTracker {
    pub(crate) fn new(agent: AgentId, config: Arc<TrackerConfig>) -> Self {
        let (died_tx, _) = broadcast::channel(config.event_capacity);
        let (spawned_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            shared: Arc::new(TrackerShared {
                agent,
                config,
                cancel: CancellationToken::new(),
                state: Mutex::new(TrackerState {
                    status: Status::Dead,
                    current: None,
                    pending: None,
                    generation: 0,
                    died_tx: Some(died_tx),
                    spawned_tx: Some(spawned_tx),
                    last_transition: None,
                }),
            }),
        }
    }

    pub fn agent(&self) -> &AgentId {
        &self.shared.agent
    }

    pub fn status(&self) -> Status {
        self.shared.state.lock().status
    }

    pub fn is_dead(&self) -> bool {
        self.status().is_dead()
    }

    /// Whether the agent has left and the tracker was torn down.
    pub fn is_ended(&self) -> bool {
        self.shared.state.lock().ended()
    }

    // ─── Non-blocking getters ────────────────────────────────────

    pub fn avatar(&self) -> Option<AvatarHandle> {
        let state = self.shared.state.lock();
        state.current.as_ref().map(|c| Arc::clone(&c.avatar))
    }

    pub fn part(&self, kind: PartKind) -> Option<PartRef> {
        let mut state = self.shared.state.lock();
        state.current.as_mut()?.part(kind)
    }

    pub fn humanoid(&self) -> Option<PartRef> {
        self.part(PartKind::Humanoid)
    }

    pub fn root_part(&self) -> Option<PartRef> {
        self.part(PartKind::RootPart)
    }

    pub fn animator(&self) -> Option<PartRef> {
        self.part(PartKind::Animator)
    }

    /// Load `clip` on the current animator, if there is one.
    pub fn try_load_animation(
        &self,
        clip: &AnimationClip,
        options: &TrackOptions,
    ) -> Option<AnimationTrack> {
        let (avatar, animator) = {
            let mut state = self.shared.state.lock();
            let current = state.current.as_mut()?;
            let animator = current.part(PartKind::Animator)?;
            (Arc::clone(&current.avatar), animator)
        };
        let mut track = avatar.load_animation(&animator, clip);
        track.apply(options);
        Some(track)
    }

    // ─── Subscriptions ───────────────────────────────────────────

    /// Subscribe to Alive -> Dead transitions.
    ///
    /// Only transitions after this call are delivered. After the tracker
    /// has ended the receiver is already closed.
    pub fn on_died(&self) -> broadcast::Receiver<StatusChange> {
        let state = self.shared.state.lock();
        subscribe_or_closed(state.died_tx.as_ref())
    }

    /// Subscribe to Dead -> Alive transitions.
    pub fn on_spawned(&self) -> broadcast::Receiver<StatusChange> {
        let state = self.shared.state.lock();
        subscribe_or_closed(state.spawned_tx.as_ref())
    }

    // ─── Awaits ──────────────────────────────────────────────────

    /// Wait until an avatar is usable and return it.
    ///
    /// Returns at once if there is a current avatar and the tracker is
    /// alive (or `accept_dead` is set). Otherwise waits for the next
    /// spawn. Fails with [`TrackerError::LifecycleEnded`] if the tracker
    /// is destroyed first.
    pub async fn await_ready(&self, accept_dead: bool) -> Result<AvatarHandle, TrackerError> {
        let mut spawned = {
            let state = self.shared.state.lock();
            if let Some(current) = &state.current {
                if !state.status.is_dead() || accept_dead {
                    return Ok(Arc::clone(&current.avatar));
                }
            }
            match &state.spawned_tx {
                Some(tx) => tx.subscribe(),
                None => return Err(self.lifecycle_ended()),
            }
        };

        loop {
            match spawned.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    let state = self.shared.state.lock();
                    if let Some(current) = &state.current {
                        return Ok(Arc::clone(&current.avatar));
                    }
                    // Detached again before this waiter ran; wait for the next one.
                }
                Err(broadcast::error::RecvError::Closed) => return Err(self.lifecycle_ended()),
            }
        }
    }

    /// Same as [`Self::await_ready`].
    pub async fn await_avatar(&self, accept_dead: bool) -> Result<AvatarHandle, TrackerError> {
        self.await_ready(accept_dead).await
    }

    /// Wait for a usable avatar, then for `kind` to exist on it.
    ///
    /// The part wait is bounded by `part_wait_timeout_ms` when configured.
    pub async fn await_part(
        &self,
        kind: PartKind,
        accept_dead: bool,
    ) -> Result<PartRef, TrackerError> {
        let (_, part) = self.await_part_on_ready(kind, accept_dead).await?;
        Ok(part)
    }

    pub async fn await_humanoid(&self, accept_dead: bool) -> Result<PartRef, TrackerError> {
        self.await_part(PartKind::Humanoid, accept_dead).await
    }

    pub async fn await_root_part(&self, accept_dead: bool) -> Result<PartRef, TrackerError> {
        self.await_part(PartKind::RootPart, accept_dead).await
    }

    pub async fn await_animator(&self, accept_dead: bool) -> Result<PartRef, TrackerError> {
        self.await_part(PartKind::Animator, accept_dead).await
    }

    /// Wait for a usable avatar, then load `clip` on its animator and apply
    /// `options` to the resulting track.
    pub async fn await_and_load_animation(
        &self,
        clip: &AnimationClip,
        options: &TrackOptions,
        accept_dead: bool,
    ) -> Result<AnimationTrack, TrackerError> {
        let (avatar, animator) = self
            .await_part_on_ready(PartKind::Animator, accept_dead)
            .await?;
        let mut track = avatar.load_animation(&animator, clip);
        track.apply(options);
        Ok(track)
    }

    async fn await_part_on_ready(
        &self,
        kind: PartKind,
        accept_dead: bool,
    ) -> Result<(AvatarHandle, PartRef), TrackerError> {
        let avatar = self.await_ready(accept_dead).await?;
        if let Some(part) = self.cached_part(avatar.id(), kind) {
            return Ok((avatar, part));
        }
        let config = &self.shared.config;
        match wait_for_part(
            &*avatar,
            kind,
            config.part_poll(),
            config.part_wait_timeout(),
            &self.shared.cancel,
        )
        .await
        {
            WaitOutcome::Found(part) => Ok((avatar, part)),
            WaitOutcome::Cancelled => Err(self.lifecycle_ended()),
            WaitOutcome::TimedOut { waited } => Err(TrackerError::PartTimeout {
                part: kind,
                waited_ms: waited.as_millis() as u64,
            }),
        }
    }

    // ─── Diagnostics ─────────────────────────────────────────────

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.shared.state.lock();
        TrackerSnapshot {
            agent: self.shared.agent.clone(),
            status: state.status,
            avatar: state.current.as_ref().map(|c| c.avatar.id().clone()),
            pending_avatar: state.pending.as_ref().map(|p| p.avatar.id().clone()),
            pending_phase: state.pending.as_ref().map(InitializerHandle::phase),
            generation: state.generation,
            last_transition: state.last_transition,
            ended: state.ended(),
        }
    }

    /// Phase of the in-flight initializer, if one is pending.
    pub fn pending_phase(&self) -> Option<InitPhase> {
        self.shared.state.lock().pending.as_ref().map(InitializerHandle::phase)
    }

    // ─── Feed (crate-internal) ───────────────────────────────────

    /// A new avatar was attached: supersede any pending initializer and
    /// start one for `avatar`. The current avatar stays until promotion.
    pub(crate) fn avatar_attached(&self, avatar: AvatarHandle) {
        let mut state = self.shared.state.lock();
        if state.ended() {
            debug!(agent = %self.shared.agent, avatar = %avatar.id(), "attach after tracker ended, ignoring");
            return;
        }
        if let Some(previous) = state.pending.take() {
            previous.abandon();
            debug!(
                agent = %self.shared.agent,
                avatar = %previous.avatar.id(),
                generation = previous.generation,
                "pending initializer superseded"
            );
        }
        state.generation += 1;
        let generation = state.generation;
        info!(agent = %self.shared.agent, avatar = %avatar.id(), generation, "avatar attached");
        state.pending = Some(AvatarInitializer::start(
            Arc::downgrade(&self.shared),
            self.shared.agent.clone(),
            avatar,
            generation,
            Arc::clone(&self.shared.config),
            self.shared.cancel.child_token(),
        ));
    }

    /// The avatar was removed: drop everything and go dead.
    pub(crate) fn avatar_detached(&self, avatar: Option<&AvatarId>) {
        let mut state = self.shared.state.lock();
        if let Some(id) = avatar {
            let known = state.current.as_ref().is_some_and(|c| c.avatar.id() == id)
                || state.pending.as_ref().is_some_and(|p| p.avatar.id() == id);
            if !known {
                debug!(agent = %self.shared.agent, avatar = %id, "detach for unknown avatar, clearing anyway");
            }
        }
        if let Some(pending) = state.pending.take() {
            pending.abandon();
        }
        if let Some(current) = state.current.take() {
            current.destroy();
            info!(agent = %self.shared.agent, avatar = %current.avatar.id(), "avatar detached");
        }
        self.shared.set_status_locked(&mut state, Status::Dead);
    }

    /// Request a status; no-op (and no event) when unchanged.
    pub(crate) fn set_status(&self, status: Status) -> bool {
        let mut state = self.shared.state.lock();
        self.shared.set_status_locked(&mut state, status)
    }

    /// Tear the tracker down: abandon pending work, destroy the current
    /// avatar (forcing a final Dead), then close both channels.
    pub(crate) fn destroy(&self) {
        let mut state = self.shared.state.lock();
        if state.ended() {
            return;
        }
        self.shared.cancel.cancel();
        if let Some(pending) = state.pending.take() {
            pending.abandon();
        }
        if let Some(current) = state.current.take() {
            current.destroy();
        }
        self.shared.set_status_locked(&mut state, Status::Dead);
        state.died_tx = None;
        state.spawned_tx = None;
        info!(agent = %self.shared.agent, "tracker destroyed");
    }

    // ─── Helpers ─────────────────────────────────────────────────

    fn lifecycle_ended(&self) -> TrackerError {
        TrackerError::LifecycleEnded {
            agent: self.shared.agent.clone(),
        }
    }

    fn cached_part(&self, avatar: &AvatarId, kind: PartKind) -> Option<PartRef> {
        let mut state = self.shared.state.lock();
        let current = state.current.as_mut()?;
        if current.avatar.id() != avatar {
            return None;
        }
        current.part(kind)
    }
}

impl TrackerShared {
    /// Initializer callback: promote `generation` to current avatar.
    ///
    /// Rejected unless `generation` is still the pending initializer and it
    /// was not abandoned. Returns whether the promotion happened.
    pub(crate) fn promote(&self, generation: u64, humanoid: PartRef) -> bool {
        let mut state = self.state.lock();
        let pending = match state.pending.take() {
            Some(p) if p.generation == generation && p.mark_ready() => p,
            other => {
                state.pending = other;
                return false;
            }
        };

        let current = CurrentAvatar::new(
            generation,
            Arc::clone(&pending.avatar),
            humanoid,
            pending.cancel.clone(),
        );
        if let Some(previous) = state.current.replace(current) {
            previous.destroy();
        }
        info!(agent = %self.agent, avatar = %pending.avatar.id(), generation, "avatar promoted");

        if pending.died_early {
            debug!(agent = %self.agent, generation, "avatar died while initializing, staying dead");
            self.set_status_locked(&mut state, Status::Dead);
        } else {
            self.set_status_locked(&mut state, Status::Alive);
        }
        true
    }

    /// Health monitor callback: non-positive health for `generation`.
    pub(crate) fn avatar_died(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.current.as_ref().is_some_and(|c| c.generation == generation) {
            self.set_status_locked(&mut state, Status::Dead);
            return;
        }
        match state.pending.as_mut() {
            Some(pending) if pending.generation == generation => {
                pending.died_early = true;
            }
            _ => debug!(agent = %self.agent, generation, "health report from stale avatar"),
        }
    }

    /// Initializer callback: gave up waiting for a required part.
    pub(crate) fn initializer_failed(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.pending.as_ref().is_some_and(|p| p.generation == generation) {
            if let Some(pending) = state.pending.take() {
                pending.abandon();
            }
        }
    }

    fn set_status_locked(&self, state: &mut TrackerState, status: Status) -> bool {
        if state.status == status {
            debug!(agent = %self.agent, %status, "status unchanged");
            return false;
        }
        state.status = status;
        let now = Utc::now();
        state.last_transition = Some(now);

        let change = StatusChange {
            agent: self.agent.clone(),
            status,
            avatar: state.current.as_ref().map(|c| c.avatar.id().clone()),
            at: now,
        };
        let tx = match status {
            Status::Dead => state.died_tx.as_ref(),
            Status::Alive => state.spawned_tx.as_ref(),
        };
        if let Some(tx) = tx {
            // No subscribers is fine.
            let _ = tx.send(change);
        }
        match status {
            Status::Alive => info!(agent = %self.agent, "spawned"),
            Status::Dead => info!(agent = %self.agent, "died"),
        }
        true
    }
}

fn subscribe_or_closed(
    tx: Option<&broadcast::Sender<StatusChange>>,
) -> broadcast::Receiver<StatusChange> {
    match tx {
        Some(tx) => tx.subscribe(),
        None => broadcast::channel(1).1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimAvatar;
    use std::time::Duration;

    fn tracker() -> AgentTracker {
        AgentTracker::new(AgentId::new("alice"), Arc::new(TrackerConfig::default()))
    }

    /// Long enough for placement polling plus the settle delay.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_tracker_is_dead_and_empty() {
        let t = tracker();
        assert!(t.is_dead());
        assert!(t.avatar().is_none());
        assert!(t.root_part().is_none());
        assert!(t.pending_phase().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn attach_promotes_and_fires_spawned_once() {
        let t = tracker();
        let mut spawned = t.on_spawned();
        let avatar = SimAvatar::spawned("alice-1");

        t.avatar_attached(avatar.handle());
        assert_eq!(t.pending_phase(), Some(InitPhase::Starting));
        settle().await;

        assert!(!t.is_dead());
        assert_eq!(t.avatar().map(|a| a.id().clone()), Some(AvatarId::new("alice-1")));
        assert!(t.pending_phase().is_none());
        let change = spawned.try_recv().expect("spawned event");
        assert_eq!(change.status, Status::Alive);
        assert_eq!(change.avatar, Some(AvatarId::new("alice-1")));
        assert!(spawned.try_recv().is_err(), "exactly one spawned event");
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_placement_before_promoting() {
        let t = tracker();
        let avatar = SimAvatar::new("alice-1");
        avatar.add_part(PartKind::Humanoid);

        t.avatar_attached(avatar.handle());
        settle().await;
        assert!(t.is_dead());
        assert_eq!(t.pending_phase(), Some(InitPhase::Starting));

        avatar.place();
        settle().await;
        assert!(!t.is_dead());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_humanoid_in_locating_phase() {
        let t = tracker();
        let avatar = SimAvatar::new("alice-1");
        avatar.place();

        t.avatar_attached(avatar.handle());
        settle().await;
        assert_eq!(t.pending_phase(), Some(InitPhase::LocatingParts));
        assert!(t.is_dead());

        avatar.add_part(PartKind::Humanoid);
        settle().await;
        assert!(!t.is_dead());
    }

    #[tokio::test(start_paused = true)]
    async fn set_status_is_idempotent() {
        let t = tracker();
        let mut died = t.on_died();
        assert!(!t.set_status(Status::Dead));
        assert!(died.try_recv().is_err());

        assert!(t.set_status(Status::Alive));
        assert!(!t.set_status(Status::Alive));
        assert!(t.set_status(Status::Dead));
        assert!(died.try_recv().is_ok());
        assert!(died.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn second_attach_abandons_first() {
        let t = tracker();
        let mut spawned = t.on_spawned();
        let first = SimAvatar::new("alice-1");
        first.place();
        first.add_part(PartKind::Humanoid);
        let second = SimAvatar::new("alice-2");

        t.avatar_attached(first.handle());
        // Let the first subscribe to health but not finish settling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        t.avatar_attached(second.handle());
        settle().await;

        assert!(t.is_dead(), "first never promotes");
        assert!(t.avatar().is_none());
        assert!(spawned.try_recv().is_err());
        assert_eq!(first.health_subscribers(), 0, "first released its subscription");
        assert_eq!(t.snapshot().pending_avatar, Some(AvatarId::new("alice-2")));
        assert_eq!(t.snapshot().generation, 2);

        second.place();
        second.add_part(PartKind::Humanoid);
        settle().await;
        assert!(!t.is_dead());
        assert_eq!(t.avatar().map(|a| a.id().clone()), Some(AvatarId::new("alice-2")));
        assert_eq!(spawned.try_recv().map(|c| c.avatar), Ok(Some(AvatarId::new("alice-2"))));
    }

    #[tokio::test(start_paused = true)]
    async fn health_zero_keeps_parts_addressable() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;
        let root = t.root_part().expect("root part");

        let mut died = t.on_died();
        avatar.set_health(50.0);
        avatar.set_health(0.0);
        settle().await;

        assert!(t.is_dead());
        assert!(died.try_recv().is_ok());
        assert!(died.try_recv().is_err());
        assert_eq!(t.root_part(), Some(root));
        assert!(t.avatar().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_zero_health_fires_once() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;

        let mut died = t.on_died();
        avatar.set_health(0.0);
        avatar.set_health(-5.0);
        settle().await;
        assert!(died.try_recv().is_ok());
        assert!(died.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn death_during_settle_promotes_dead() {
        let t = tracker();
        let mut spawned = t.on_spawned();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());

        // Placement and humanoid are immediate; health is subscribed before
        // the settle delay elapses.
        tokio::time::sleep(Duration::from_millis(5)).await;
        avatar.set_health(0.0);
        settle().await;

        assert!(t.avatar().is_some());
        assert!(t.is_dead());
        assert!(spawned.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn detach_clears_and_goes_dead() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;

        let mut died = t.on_died();
        t.avatar_detached(Some(&AvatarId::new("alice-1")));
        settle().await;

        assert!(t.is_dead());
        assert!(t.avatar().is_none());
        assert!(t.root_part().is_none());
        assert!(died.try_recv().is_ok());
        assert_eq!(avatar.health_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn detach_while_dead_fires_nothing() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;
        avatar.set_health(0.0);
        settle().await;

        let mut died = t.on_died();
        t.avatar_detached(None);
        assert!(t.is_dead());
        assert!(died.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn detach_abandons_pending() {
        let t = tracker();
        let avatar = SimAvatar::new("alice-1");
        avatar.place();
        avatar.add_part(PartKind::Humanoid);
        t.avatar_attached(avatar.handle());
        tokio::time::sleep(Duration::from_millis(5)).await;

        t.avatar_detached(None);
        settle().await;
        assert!(t.is_dead());
        assert!(t.avatar().is_none());
        assert!(t.pending_phase().is_none());
        assert_eq!(avatar.health_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn await_ready_returns_immediately_when_alive() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;

        let ready = t.await_ready(false).await.expect("ready");
        assert_eq!(ready.id(), &AvatarId::new("alice-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn await_ready_waits_for_next_spawn() {
        let t = tracker();
        let waiter = {
            let t = t.clone();
            tokio::spawn(async move { t.await_ready(false).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        t.avatar_attached(SimAvatar::spawned("alice-1").handle());
        let ready = waiter.await.expect("join").expect("ready");
        assert_eq!(ready.id(), &AvatarId::new("alice-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn await_ready_accept_dead_returns_corpse() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;
        avatar.set_health(0.0);
        settle().await;
        assert!(t.is_dead());

        let corpse = t.await_ready(true).await.expect("corpse");
        assert_eq!(corpse.id(), &AvatarId::new("alice-1"));

        let strict = tokio::time::timeout(Duration::from_secs(1), t.await_ready(false)).await;
        assert!(strict.is_err(), "dead avatar does not satisfy a strict await");
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_fails_pending_awaits() {
        let t = tracker();
        let waiter = {
            let t = t.clone();
            tokio::spawn(async move { t.await_ready(false).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        t.destroy();

        let result = waiter.await.expect("join");
        assert_eq!(
            result.map(|a| a.id().clone()),
            Err(TrackerError::LifecycleEnded {
                agent: AgentId::new("alice")
            })
        );
        assert!(t.is_ended());
        assert!(matches!(
            t.await_ready(true).await,
            Err(TrackerError::LifecycleEnded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_mid_initialization_never_promotes() {
        let t = tracker();
        let mut spawned = t.on_spawned();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(avatar.health_subscribers(), 1);

        t.destroy();
        settle().await;

        assert!(t.is_dead());
        assert!(t.avatar().is_none());
        assert_eq!(avatar.health_subscribers(), 0);
        assert!(matches!(
            spawned.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_alive_tracker_fires_final_died() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;

        let mut died = t.on_died();
        t.destroy();
        assert!(died.try_recv().is_ok());
        assert!(matches!(
            died.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        // Second destroy is a no-op.
        t.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_after_destroy_are_closed() {
        let t = tracker();
        t.destroy();
        let mut died = t.on_died();
        assert!(matches!(
            died.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        t.avatar_attached(SimAvatar::spawned("alice-1").handle());
        settle().await;
        assert!(t.is_dead());
        assert!(t.pending_phase().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn await_root_part_waits_for_late_part() {
        let t = tracker();
        let avatar = SimAvatar::new("alice-1");
        avatar.place();
        avatar.add_part(PartKind::Humanoid);
        t.avatar_attached(avatar.handle());
        settle().await;
        assert!(t.root_part().is_none());

        let builder = Arc::clone(&avatar);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            builder.add_part(PartKind::RootPart);
        });
        let root = t.await_root_part(false).await.expect("root part");
        assert_eq!(root.path, "alice-1/HumanoidRootPart");
    }

    #[tokio::test(start_paused = true)]
    async fn await_part_times_out_when_configured() {
        let config = TrackerConfig {
            part_wait_timeout_ms: Some(100),
            ..TrackerConfig::default()
        };
        let t = AgentTracker::new(AgentId::new("alice"), Arc::new(config));
        let avatar = SimAvatar::new("alice-1");
        avatar.place();
        avatar.add_part(PartKind::Humanoid);
        t.avatar_attached(avatar.handle());
        settle().await;

        let err = t.await_root_part(false).await.expect_err("timeout");
        assert!(matches!(
            err,
            TrackerError::PartTimeout {
                part: PartKind::RootPart,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn humanoid_timeout_abandons_initializer() {
        let config = TrackerConfig {
            part_wait_timeout_ms: Some(100),
            ..TrackerConfig::default()
        };
        let t = AgentTracker::new(AgentId::new("alice"), Arc::new(config));
        let avatar = SimAvatar::new("alice-1");
        avatar.place();
        t.avatar_attached(avatar.handle());
        settle().await;

        assert!(t.is_dead());
        assert!(t.pending_phase().is_none());
        avatar.add_part(PartKind::Humanoid);
        settle().await;
        assert!(t.is_dead(), "abandoned initializer never comes back");
    }

    #[tokio::test(start_paused = true)]
    async fn await_and_load_animation_applies_options() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());

        let options = TrackOptions {
            looped: Some(true),
            weight: Some(0.5),
            ..TrackOptions::default()
        };
        let track = t
            .await_and_load_animation(&AnimationClip::new("rbxassetid://42"), &options, false)
            .await
            .expect("track");
        assert!(track.looped);
        assert_eq!(track.weight, 0.5);
        assert_eq!(track.animator.path, "alice-1/Humanoid/Animator");
        assert_eq!(avatar.animations_loaded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn try_load_animation_without_avatar_is_none() {
        let t = tracker();
        let clip = AnimationClip::new("rbxassetid://42");
        assert!(t.try_load_animation(&clip, &TrackOptions::default()).is_none());

        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;
        assert!(t.try_load_animation(&clip, &TrackOptions::default()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reflects_state() {
        let t = tracker();
        let avatar = SimAvatar::spawned("alice-1");
        t.avatar_attached(avatar.handle());
        settle().await;

        let snap = t.snapshot();
        assert_eq!(snap.agent, AgentId::new("alice"));
        assert_eq!(snap.status, Status::Alive);
        assert_eq!(snap.avatar, Some(AvatarId::new("alice-1")));
        assert!(snap.pending_avatar.is_none());
        assert_eq!(snap.generation, 1);
        assert!(snap.last_transition.is_some());
        assert!(!snap.ended);
    }
}
