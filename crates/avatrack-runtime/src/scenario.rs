//! Scenario files: a scripted sequence of agent and avatar events, plus
//! the outcome each agent should end up with.

use std::path::Path;

use anyhow::Context;
use avatrack_core::{AgentId, AvatarId, PartKind, Status};
use serde::Deserialize;

/// Idle time granted after the last step before the outcome is read.
const DEFAULT_SETTLE_MS: u64 = 250;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default local agent when `--local` is not given.
    #[serde(default)]
    pub local: Option<AgentId>,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub expect: Vec<Expectation>,
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

#[derive(Debug, Deserialize)]
pub struct Step {
    /// Wait this long before applying the action.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

/// Avatars are referred to by name and created on first mention, bare
/// (not placed, no parts) unless `spawned` is set on join/attach.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Join {
        agent: AgentId,
        #[serde(default)]
        avatar: Option<AvatarId>,
        #[serde(default)]
        spawned: bool,
    },
    Leave {
        agent: AgentId,
    },
    Attach {
        agent: AgentId,
        avatar: AvatarId,
        #[serde(default)]
        spawned: bool,
    },
    Detach {
        agent: AgentId,
        #[serde(default)]
        avatar: Option<AvatarId>,
    },
    Place {
        avatar: AvatarId,
    },
    AddPart {
        avatar: AvatarId,
        part: PartKind,
    },
    Health {
        avatar: AvatarId,
        value: f64,
    },
}

/// Expected end state of one agent. Unset fields are not checked.
#[derive(Debug, Clone, Deserialize)]
pub struct Expectation {
    pub agent: AgentId,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub avatar: Option<AvatarId>,
    #[serde(default)]
    pub spawned: Option<usize>,
    #[serde(default)]
    pub died: Option<usize>,
    /// Whether the agent should still be tracked at the end.
    #[serde(default)]
    pub tracked: Option<bool>,
}

impl Scenario {
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let scenario: Self = serde_json::from_str(content).context("invalid scenario JSON")?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("in scenario {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_action() {
        let scenario = Scenario::from_json(
            r#"{
                "name": "all",
                "steps": [
                    {"action": "join", "agent": "alice"},
                    {"action": "attach", "agent": "alice", "avatar": "alice-1", "delay_ms": 5},
                    {"action": "place", "avatar": "alice-1"},
                    {"action": "add_part", "avatar": "alice-1", "part": "root_part"},
                    {"action": "health", "avatar": "alice-1", "value": 0},
                    {"action": "detach", "agent": "alice"},
                    {"action": "leave", "agent": "alice"}
                ]
            }"#,
        )
        .expect("parse");

        assert_eq!(scenario.settle_ms, DEFAULT_SETTLE_MS);
        assert_eq!(scenario.steps.len(), 7);
        assert_eq!(scenario.steps[1].delay_ms, 5);
        assert!(matches!(
            &scenario.steps[0].action,
            Action::Join { agent, avatar: None, spawned: false } if agent.as_str() == "alice"
        ));
        assert!(matches!(
            scenario.steps[3].action,
            Action::AddPart { part: PartKind::RootPart, .. }
        ));
        assert!(matches!(
            &scenario.steps[5].action,
            Action::Detach { avatar: None, .. }
        ));
    }

    #[test]
    fn parses_expectations() {
        let scenario = Scenario::from_json(
            r#"{
                "name": "expect",
                "local": "alice",
                "steps": [],
                "expect": [{"agent": "alice", "status": "alive", "spawned": 1}]
            }"#,
        )
        .expect("parse");
        assert_eq!(scenario.local, Some(AgentId::new("alice")));
        let exp = &scenario.expect[0];
        assert_eq!(exp.status, Some(Status::Alive));
        assert_eq!(exp.spawned, Some(1));
        assert!(exp.died.is_none());
    }

    #[test]
    fn rejects_unknown_action() {
        let err = Scenario::from_json(
            r#"{"name": "bad", "steps": [{"action": "teleport", "agent": "a"}]}"#,
        )
        .expect_err("unknown action");
        assert!(err.to_string().contains("invalid scenario JSON"));
    }
}
