//! Inbound collaborator feed: join/leave and attach/detach events, and the
//! driver loop that applies them to a registry.

use avatrack_core::{AgentId, AvatarId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::TrackerRegistry;
use crate::world::AvatarHandle;

/// Event emitted by the engine-side adapter into the registry.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// An agent joined, possibly already carrying an avatar.
    Joined {
        agent: AgentId,
        avatar: Option<AvatarHandle>,
    },
    Left {
        agent: AgentId,
    },
    AvatarAttached {
        agent: AgentId,
        avatar: AvatarHandle,
    },
    AvatarDetached {
        agent: AgentId,
        avatar: Option<AvatarId>,
    },
}

impl AgentEvent {
    pub fn agent(&self) -> &AgentId {
        match self {
            Self::Joined { agent, .. }
            | Self::Left { agent }
            | Self::AvatarAttached { agent, .. }
            | Self::AvatarDetached { agent, .. } => agent,
        }
    }
}

impl TrackerRegistry {
    /// Apply one feed event.
    pub fn apply(&self, event: AgentEvent) {
        match event {
            AgentEvent::Joined { agent, avatar } => {
                self.on_agent_joined(agent, avatar);
            }
            AgentEvent::Left { agent } => {
                self.on_agent_left(&agent);
            }
            AgentEvent::AvatarAttached { agent, avatar } => {
                self.on_avatar_attached(&agent, avatar);
            }
            AgentEvent::AvatarDetached { agent, avatar } => {
                self.on_avatar_detached(&agent, avatar.as_ref());
            }
        }
    }
}

/// Consumes the feed channel and applies each event to the registry.
pub struct RegistryDriver {
    registry: TrackerRegistry,
    feed_rx: mpsc::Receiver<AgentEvent>,
    cancel: CancellationToken,
}

impl RegistryDriver {
    pub fn new(registry: TrackerRegistry, feed_rx: mpsc::Receiver<AgentEvent>) -> Self {
        Self::with_cancel(registry, feed_rx, CancellationToken::new())
    }

    /// Create a driver with an explicit cancellation token for graceful shutdown.
    pub fn with_cancel(
        registry: TrackerRegistry,
        feed_rx: mpsc::Receiver<AgentEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            feed_rx,
            cancel,
        }
    }

    pub fn registry(&self) -> &TrackerRegistry {
        &self.registry
    }

    /// Main event loop. Runs until the feed channel is closed or the
    /// cancellation token is triggered. Does not shut the registry down.
    pub async fn run(&mut self) {
        info!("registry driver: event loop started");
        loop {
            tokio::select! {
                event = self.feed_rx.recv() => {
                    match event {
                        Some(event) => {
                            debug!(agent = %event.agent(), "feed event");
                            self.registry.apply(event);
                        }
                        None => {
                            info!("registry driver: feed closed, stopping");
                            break;
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!("registry driver: cancellation requested, stopping");
                    break;
                }
            }
        }
    }
}
