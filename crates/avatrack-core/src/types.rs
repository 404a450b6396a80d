use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::phase::InitPhase;

// ─── Identities ──────────────────────────────────────────────────

/// Stable identity of an externally managed agent (e.g. a connected user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of one avatar instance. A respawn produces a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvatarId(String);

impl AvatarId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AvatarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AvatarId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ─── Status ──────────────────────────────────────────────────────

/// Binary readiness of an agent's current avatar.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Alive,
    #[default]
    Dead,
}

impl Status {
    pub fn is_dead(self) -> bool {
        matches!(self, Self::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Parts ───────────────────────────────────────────────────────

/// Sub-resources of an avatar the tracker knows how to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    /// Primary controllable part; reports health.
    Humanoid,
    /// Spatial anchor.
    RootPart,
    /// Animation playback, nested under the humanoid.
    Animator,
}

impl PartKind {
    pub const ALL: [Self; 3] = [Self::Humanoid, Self::RootPart, Self::Animator];

    /// Child name the engine uses for this part.
    pub fn child_name(self) -> &'static str {
        match self {
            Self::Humanoid => "Humanoid",
            Self::RootPart => "HumanoidRootPart",
            Self::Animator => "Animator",
        }
    }

    /// Part this one is nested under, `None` when it hangs off the avatar root.
    pub fn parent(self) -> Option<PartKind> {
        match self {
            Self::Animator => Some(Self::Humanoid),
            Self::Humanoid | Self::RootPart => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Humanoid => "humanoid",
            Self::RootPart => "root_part",
            Self::Animator => "animator",
        }
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a resolved avatar part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartRef {
    pub avatar: AvatarId,
    pub kind: PartKind,
    /// Engine path, e.g. `bob-1/Humanoid/Animator`.
    pub path: String,
}

impl PartRef {
    pub fn new(avatar: AvatarId, kind: PartKind) -> Self {
        let path = match kind.parent() {
            Some(parent) => format!("{avatar}/{}/{}", parent.child_name(), kind.child_name()),
            None => format!("{avatar}/{}", kind.child_name()),
        };
        Self { avatar, kind, path }
    }
}

// ─── Animation ───────────────────────────────────────────────────

/// Animation asset to load onto an animator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnimationClip {
    pub asset_id: String,
}

impl AnimationClip {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationPriority {
    #[default]
    Core,
    Idle,
    Movement,
    Action,
}

/// Properties applied to a freshly loaded track. Unset fields keep the
/// track's defaults.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackOptions {
    pub looped: Option<bool>,
    pub priority: Option<AnimationPriority>,
    pub speed: Option<f64>,
    pub weight: Option<f64>,
}

/// A clip loaded onto a specific animator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationTrack {
    pub clip: AnimationClip,
    pub animator: PartRef,
    pub looped: bool,
    pub priority: AnimationPriority,
    pub speed: f64,
    pub weight: f64,
}

impl AnimationTrack {
    pub fn new(clip: AnimationClip, animator: PartRef) -> Self {
        Self {
            clip,
            animator,
            looped: false,
            priority: AnimationPriority::default(),
            speed: 1.0,
            weight: 1.0,
        }
    }

    pub fn apply(&mut self, options: &TrackOptions) {
        if let Some(looped) = options.looped {
            self.looped = looped;
        }
        if let Some(priority) = options.priority {
            self.priority = priority;
        }
        if let Some(speed) = options.speed {
            self.speed = speed;
        }
        if let Some(weight) = options.weight {
            self.weight = weight;
        }
    }
}

// ─── Diagnostics ─────────────────────────────────────────────────

/// Point-in-time view of one tracker, for logs and the runtime summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub agent: AgentId,
    pub status: Status,
    pub avatar: Option<AvatarId>,
    pub pending_avatar: Option<AvatarId>,
    pub pending_phase: Option<InitPhase>,
    /// Number of initializers started so far.
    pub generation: u64,
    pub last_transition: Option<DateTime<Utc>>,
    pub ended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_dead() {
        assert_eq!(Status::default(), Status::Dead);
        assert!(Status::default().is_dead());
        assert!(!Status::Alive.is_dead());
    }

    #[test]
    fn part_paths_follow_nesting() {
        let avatar = AvatarId::new("bob-1");
        assert_eq!(
            PartRef::new(avatar.clone(), PartKind::Humanoid).path,
            "bob-1/Humanoid"
        );
        assert_eq!(
            PartRef::new(avatar.clone(), PartKind::RootPart).path,
            "bob-1/HumanoidRootPart"
        );
        assert_eq!(
            PartRef::new(avatar, PartKind::Animator).path,
            "bob-1/Humanoid/Animator"
        );
    }

    #[test]
    fn track_options_only_override_set_fields() {
        let animator = PartRef::new(AvatarId::new("a"), PartKind::Animator);
        let mut track = AnimationTrack::new(AnimationClip::new("rbxassetid://1"), animator);
        track.apply(&TrackOptions {
            looped: Some(true),
            speed: Some(2.0),
            ..TrackOptions::default()
        });
        assert!(track.looped);
        assert_eq!(track.speed, 2.0);
        assert_eq!(track.weight, 1.0);
        assert_eq!(track.priority, AnimationPriority::Core);
    }

    #[test]
    fn track_options_deserialize_partial() {
        let opts: TrackOptions =
            serde_json::from_str(r#"{"priority":"action"}"#).expect("valid options");
        assert_eq!(opts.priority, Some(AnimationPriority::Action));
        assert!(opts.looped.is_none());
    }

    #[test]
    fn agent_id_serializes_transparently() {
        let id = AgentId::from("alice");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"alice\"");
        assert_eq!(id.to_string(), "alice");
    }
}
