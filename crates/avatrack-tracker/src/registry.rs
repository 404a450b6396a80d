//! Agent -> tracker mapping.
//!
//! An explicit service object: construct it, `bootstrap` it with the
//! agents already present, feed it join/leave/attach/detach, and
//! `shutdown` it when done. Cloning shares the same mapping.

use std::collections::HashMap;
use std::sync::Arc;

use avatrack_core::{AgentId, AvatarId, TrackerConfig, TrackerError, TrackerSnapshot};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::AgentTracker;
use crate::world::AvatarHandle;

struct RegistryInner {
    config: Arc<TrackerConfig>,
    trackers: RwLock<HashMap<AgentId, AgentTracker>>,
    local_agent: RwLock<Option<AgentId>>,
    /// Woken on every join so `await_lookup` can re-check.
    joined: Notify,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct TrackerRegistry {
    inner: Arc<RegistryInner>,
}

impl TrackerRegistry {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config: Arc::new(config),
                trackers: RwLock::new(HashMap::new()),
                local_agent: RwLock::new(None),
                joined: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn with_local_agent(self, agent: AgentId) -> Self {
        self.set_local_agent(agent);
        self
    }

    pub fn set_local_agent(&self, agent: AgentId) {
        *self.inner.local_agent.write() = Some(agent);
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Create trackers for every agent already present, each seeded with
    /// its currently attached avatar.
    pub fn bootstrap<I>(&self, present: I)
    where
        I: IntoIterator<Item = (AgentId, Option<AvatarHandle>)>,
    {
        let mut count = 0usize;
        for (agent, avatar) in present {
            self.on_agent_joined(agent, avatar);
            count += 1;
        }
        info!(agents = count, "registry bootstrapped");
    }

    /// Create a tracker for `agent` unless one exists. Returns the tracker,
    /// or `None` once the registry has shut down.
    pub fn on_agent_joined(
        &self,
        agent: AgentId,
        avatar: Option<AvatarHandle>,
    ) -> Option<AgentTracker> {
        if self.is_shut_down() {
            warn!(agent = %agent, "join after registry shutdown");
            return None;
        }
        let tracker = {
            let mut trackers = self.inner.trackers.write();
            if let Some(existing) = trackers.get(&agent) {
                debug!(agent = %agent, "agent already tracked");
                return Some(existing.clone());
            }
            let tracker = AgentTracker::new(agent.clone(), Arc::clone(&self.inner.config));
            if let Some(avatar) = avatar {
                tracker.avatar_attached(avatar);
            }
            trackers.insert(agent.clone(), tracker.clone());
            tracker
        };
        info!(agent = %agent, "agent joined");
        self.inner.joined.notify_waiters();
        Some(tracker)
    }

    /// Remove and destroy the tracker for `agent`. Returns whether one existed.
    pub fn on_agent_left(&self, agent: &AgentId) -> bool {
        let removed = self.inner.trackers.write().remove(agent);
        match removed {
            Some(tracker) => {
                tracker.destroy();
                info!(agent = %agent, "agent left");
                true
            }
            None => {
                debug!(agent = %agent, "leave for untracked agent");
                false
            }
        }
    }

    pub fn on_avatar_attached(&self, agent: &AgentId, avatar: AvatarHandle) -> bool {
        match self.lookup(agent) {
            Some(tracker) => {
                tracker.avatar_attached(avatar);
                true
            }
            None => {
                warn!(agent = %agent, avatar = %avatar.id(), "attach for untracked agent");
                false
            }
        }
    }

    pub fn on_avatar_detached(&self, agent: &AgentId, avatar: Option<&AvatarId>) -> bool {
        match self.lookup(agent) {
            Some(tracker) => {
                tracker.avatar_detached(avatar);
                true
            }
            None => {
                warn!(agent = %agent, "detach for untracked agent");
                false
            }
        }
    }

    pub fn lookup(&self, agent: &AgentId) -> Option<AgentTracker> {
        self.inner.trackers.read().get(agent).cloned()
    }

    /// Tracker for the local agent, if one is configured and has joined.
    pub fn local_tracker(&self) -> Option<AgentTracker> {
        let local = self.inner.local_agent.read().clone()?;
        self.lookup(&local)
    }

    /// Wait until `agent` has a tracker.
    ///
    /// Woken by joins, with a slow poll as a fallback. Fails with
    /// [`TrackerError::LifecycleEnded`] once the registry shuts down.
    pub async fn await_lookup(&self, agent: &AgentId) -> Result<AgentTracker, TrackerError> {
        loop {
            let notified = self.inner.joined.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.cancel.is_cancelled() {
                return Err(TrackerError::LifecycleEnded {
                    agent: agent.clone(),
                });
            }
            if let Some(tracker) = self.lookup(agent) {
                return Ok(tracker);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.inner.config.lookup_poll()) => {}
            }
        }
    }

    pub fn agents(&self) -> Vec<AgentId> {
        self.inner.trackers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.trackers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.trackers.read().is_empty()
    }

    /// Snapshots of every tracker, sorted by agent.
    pub fn snapshots(&self) -> Vec<TrackerSnapshot> {
        let mut snaps: Vec<TrackerSnapshot> = self
            .inner
            .trackers
            .read()
            .values()
            .map(AgentTracker::snapshot)
            .collect();
        snaps.sort_by(|a, b| a.agent.cmp(&b.agent));
        snaps
    }

    /// Destroy every tracker and fail pending `await_lookup` calls.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let drained: Vec<AgentTracker> = self
            .inner
            .trackers
            .write()
            .drain()
            .map(|(_, tracker)| tracker)
            .collect();
        for tracker in &drained {
            tracker.destroy();
        }
        info!(trackers = drained.len(), "registry shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}
