//! In-memory avatar used by tests and by the runtime's scenario replay.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use avatrack_core::{AnimationClip, AnimationTrack, AvatarId, PartKind, PartRef};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::world::{AvatarHandle, AvatarModel};

/// Buffer for the simulated health stream.
const HEALTH_CAPACITY: usize = 16;

/// Simulated avatar whose placement, parts and health are driven by hand.
#[derive(Debug)]
pub struct SimAvatar {
    id: AvatarId,
    in_world: AtomicBool,
    parts: Mutex<HashSet<PartKind>>,
    health_tx: broadcast::Sender<f64>,
    animations_loaded: AtomicUsize,
}

impl SimAvatar {
    /// A bare avatar: not in the world, no parts yet.
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let (health_tx, _) = broadcast::channel(HEALTH_CAPACITY);
        Arc::new(Self {
            id: AvatarId::new(id),
            in_world: AtomicBool::new(false),
            parts: Mutex::new(HashSet::new()),
            health_tx,
            animations_loaded: AtomicUsize::new(0),
        })
    }

    /// An avatar already placed with every part present.
    pub fn spawned(id: impl Into<String>) -> Arc<Self> {
        let avatar = Self::new(id);
        avatar.place();
        for kind in PartKind::ALL {
            avatar.add_part(kind);
        }
        avatar
    }

    pub fn handle(self: &Arc<Self>) -> AvatarHandle {
        Arc::clone(self) as AvatarHandle
    }

    pub fn place(&self) {
        self.in_world.store(true, Ordering::SeqCst);
    }

    pub fn add_part(&self, kind: PartKind) {
        self.parts.lock().insert(kind);
    }

    pub fn remove_part(&self, kind: PartKind) {
        self.parts.lock().remove(&kind);
    }

    /// Report a health value to every current subscriber.
    pub fn set_health(&self, value: f64) {
        let _ = self.health_tx.send(value);
    }

    /// Live health subscriptions. Zero once every tracker let go.
    pub fn health_subscribers(&self) -> usize {
        self.health_tx.receiver_count()
    }

    pub fn animations_loaded(&self) -> usize {
        self.animations_loaded.load(Ordering::SeqCst)
    }
}

impl AvatarModel for SimAvatar {
    fn id(&self) -> &AvatarId {
        &self.id
    }

    fn is_in_world(&self) -> bool {
        self.in_world.load(Ordering::SeqCst)
    }

    fn find_part(&self, kind: PartKind) -> Option<PartRef> {
        let parts = self.parts.lock();
        if !parts.contains(&kind) {
            return None;
        }
        // Nested parts are unreachable until their parent exists.
        if let Some(parent) = kind.parent() {
            if !parts.contains(&parent) {
                return None;
            }
        }
        Some(PartRef::new(self.id.clone(), kind))
    }

    fn subscribe_health(&self, _humanoid: &PartRef) -> broadcast::Receiver<f64> {
        self.health_tx.subscribe()
    }

    fn load_animation(&self, animator: &PartRef, clip: &AnimationClip) -> AnimationTrack {
        self.animations_loaded.fetch_add(1, Ordering::SeqCst);
        AnimationTrack::new(clip.clone(), animator.clone())
    }
}
