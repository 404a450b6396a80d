//! Replay a [`Scenario`] against a fresh registry fed through the
//! registry driver, recording every status transition.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use avatrack_core::{AgentId, AvatarId, PartKind, Status, TrackerConfig, TrackerSnapshot};
use avatrack_tracker::{AgentEvent, RegistryDriver, SimAvatar, StatusChange, TrackerRegistry};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::scenario::{Action, Expectation, Scenario};

const FEED_CAPACITY: usize = 64;

/// One observed status flip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    /// Milliseconds since the replay started.
    pub at_ms: u64,
    pub agent: AgentId,
    pub status: Status,
    pub avatar: Option<AvatarId>,
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub scenario: String,
    pub local: Option<AgentId>,
    pub transitions: Vec<Transition>,
    /// Trackers still registered after the settle period.
    pub agents: Vec<TrackerSnapshot>,
}

impl ReplayReport {
    pub fn count(&self, agent: &AgentId, status: Status) -> usize {
        self.transitions
            .iter()
            .filter(|t| &t.agent == agent && t.status == status)
            .count()
    }

    fn snapshot(&self, agent: &AgentId) -> Option<&TrackerSnapshot> {
        self.agents.iter().find(|s| &s.agent == agent)
    }

    /// Compare against the scenario's expectations. Returns one message per
    /// mismatch; empty means everything matched.
    pub fn check(&self, expect: &[Expectation]) -> Vec<String> {
        let mut failures = Vec::new();
        for exp in expect {
            let agent = &exp.agent;
            let snapshot = self.snapshot(agent);

            if let Some(tracked) = exp.tracked {
                if snapshot.is_some() != tracked {
                    failures.push(format!(
                        "{agent}: expected tracked={tracked}, got tracked={}",
                        snapshot.is_some()
                    ));
                }
            }
            if let Some(status) = exp.status {
                match snapshot {
                    Some(s) if s.status == status => {}
                    Some(s) => {
                        failures.push(format!("{agent}: expected {status}, got {}", s.status))
                    }
                    None => failures.push(format!("{agent}: expected {status}, not tracked")),
                }
            }
            if let Some(avatar) = &exp.avatar {
                let actual = snapshot.and_then(|s| s.avatar.as_ref());
                if actual != Some(avatar) {
                    failures.push(format!("{agent}: expected avatar {avatar}, got {actual:?}"));
                }
            }
            for (expected, status) in [(exp.spawned, Status::Alive), (exp.died, Status::Dead)] {
                let Some(expected) = expected else { continue };
                let actual = self.count(agent, status);
                if actual != expected {
                    let label = if status.is_dead() { "died" } else { "spawned" };
                    failures.push(format!(
                        "{agent}: expected {expected} {label} event(s), got {actual}"
                    ));
                }
            }
        }
        failures
    }

    /// Human-readable transcript and per-agent summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "scenario: {}", self.scenario);
        for t in &self.transitions {
            let verb = if t.status.is_dead() { "died" } else { "spawned" };
            let avatar = t.avatar.as_ref().map_or("-", AvatarId::as_str);
            let _ = writeln!(out, "{:>6}ms  {} {verb} ({avatar})", t.at_ms, t.agent);
        }
        let _ = writeln!(out, "summary:");
        if self.agents.is_empty() {
            let _ = writeln!(out, "  (no agents tracked)");
        }
        for s in &self.agents {
            let avatar = s.avatar.as_ref().map_or("-", AvatarId::as_str);
            let pending = match (&s.pending_avatar, s.pending_phase) {
                (Some(id), Some(phase)) => format!(" pending={id}:{phase}"),
                _ => String::new(),
            };
            let local = if self.local.as_ref() == Some(&s.agent) {
                " (local)"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  {:<12} {:<5} avatar={avatar} generation={}{pending}{local}",
                s.agent.as_str(),
                s.status.as_str(),
                s.generation
            );
        }
        out
    }
}

struct Replay {
    registry: TrackerRegistry,
    feed_tx: mpsc::Sender<AgentEvent>,
    avatars: HashMap<AvatarId, Arc<SimAvatar>>,
    watching: HashSet<AgentId>,
    transitions_tx: mpsc::UnboundedSender<Transition>,
    start: Instant,
}

impl Replay {
    /// Simulated avatar by name, created bare on first use.
    fn avatar(&mut self, id: &AvatarId, spawned: bool) -> Arc<SimAvatar> {
        let avatar = self
            .avatars
            .entry(id.clone())
            .or_insert_with(|| SimAvatar::new(id.as_str()));
        if spawned {
            avatar.place();
            for kind in PartKind::ALL {
                avatar.add_part(kind);
            }
        }
        Arc::clone(avatar)
    }

    /// Record transitions for `agent` across every tracker it gets.
    fn watch(&mut self, agent: &AgentId) {
        if !self.watching.insert(agent.clone()) {
            return;
        }
        tokio::spawn(watch_agent(
            self.registry.clone(),
            agent.clone(),
            self.start,
            self.transitions_tx.clone(),
        ));
    }

    async fn apply(&mut self, action: &Action) -> anyhow::Result<()> {
        let event = match action {
            Action::Join {
                agent,
                avatar,
                spawned,
            } => {
                self.watch(agent);
                let avatar = avatar.as_ref().map(|id| self.avatar(id, *spawned).handle());
                AgentEvent::Joined {
                    agent: agent.clone(),
                    avatar,
                }
            }
            Action::Leave { agent } => AgentEvent::Left {
                agent: agent.clone(),
            },
            Action::Attach {
                agent,
                avatar,
                spawned,
            } => AgentEvent::AvatarAttached {
                agent: agent.clone(),
                avatar: self.avatar(avatar, *spawned).handle(),
            },
            Action::Detach { agent, avatar } => AgentEvent::AvatarDetached {
                agent: agent.clone(),
                avatar: avatar.clone(),
            },
            Action::Place { avatar } => {
                self.avatar(avatar, false).place();
                return Ok(());
            }
            Action::AddPart { avatar, part } => {
                self.avatar(avatar, false).add_part(*part);
                return Ok(());
            }
            Action::Health { avatar, value } => {
                self.avatar(avatar, false).set_health(*value);
                return Ok(());
            }
        };
        self.feed_tx
            .send(event)
            .await
            .context("registry driver stopped")?;
        Ok(())
    }
}

async fn watch_agent(
    registry: TrackerRegistry,
    agent: AgentId,
    start: Instant,
    out: mpsc::UnboundedSender<Transition>,
) {
    // Ends when the registry shuts down.
    while let Ok(tracker) = registry.await_lookup(&agent).await {
        let mut died = tracker.on_died();
        let mut spawned = tracker.on_spawned();
        loop {
            let received = tokio::select! {
                biased;
                r = died.recv() => r,
                r = spawned.recv() => r,
            };
            match received {
                Ok(change) => emit(&out, start, change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(agent = %agent, skipped, "transition watcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        // Whatever the other channel still buffers before it closed.
        for rx in [&mut died, &mut spawned] {
            while let Ok(change) = rx.try_recv() {
                emit(&out, start, change);
            }
        }
        debug!(agent = %agent, "tracker ended, watching for rejoin");
    }
}

fn emit(out: &mpsc::UnboundedSender<Transition>, start: Instant, change: StatusChange) {
    let transition = Transition {
        at_ms: start.elapsed().as_millis() as u64,
        agent: change.agent,
        status: change.status,
        avatar: change.avatar,
    };
    // Receiver is gone once the report is assembled.
    let _ = out.send(transition);
}

/// Run every step of `scenario`, wait `settle_ms`, then report.
pub async fn replay(
    scenario: &Scenario,
    config: TrackerConfig,
    local: Option<AgentId>,
) -> anyhow::Result<ReplayReport> {
    let registry = TrackerRegistry::new(config);
    if let Some(local) = &local {
        registry.set_local_agent(local.clone());
    }

    let (feed_tx, feed_rx) = mpsc::channel(FEED_CAPACITY);
    let mut driver = RegistryDriver::new(registry.clone(), feed_rx);
    let driver_task = tokio::spawn(async move { driver.run().await });

    let (transitions_tx, mut transitions_rx) = mpsc::unbounded_channel();
    let mut replay = Replay {
        registry: registry.clone(),
        feed_tx,
        avatars: HashMap::new(),
        watching: HashSet::new(),
        transitions_tx,
        start: Instant::now(),
    };

    info!(scenario = %scenario.name, steps = scenario.steps.len(), "replay started");
    for (index, step) in scenario.steps.iter().enumerate() {
        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }
        debug!(step = index, action = ?step.action, "applying step");
        replay.apply(&step.action).await?;
    }

    // Closing the feed lets the driver drain what is queued and stop.
    drop(replay);
    driver_task.await.context("registry driver panicked")?;
    tokio::time::sleep(Duration::from_millis(scenario.settle_ms)).await;

    let agents = registry.snapshots();
    let local = registry.local_tracker().map(|t| t.agent().clone());
    let mut transitions = Vec::new();
    while let Ok(t) = transitions_rx.try_recv() {
        transitions.push(t);
    }
    transitions.sort_by_key(|t| t.at_ms);

    registry.shutdown();
    info!(
        scenario = %scenario.name,
        transitions = transitions.len(),
        agents = agents.len(),
        "replay finished"
    );

    Ok(ReplayReport {
        scenario: scenario.name.clone(),
        local,
        transitions,
        agents,
    })
}
