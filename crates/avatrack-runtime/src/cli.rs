//! CLI definition using clap derive.

use std::path::{Path, PathBuf};

use anyhow::Context;
use avatrack_core::TrackerConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "avatrack", about = "Avatar readiness tracker")]
pub struct Cli {
    /// Tracker config file (TOML)
    #[arg(long, short = 'c', global = true, env = "AVATRACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the settle delay in milliseconds
    #[arg(long, global = true)]
    pub settle_delay_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a JSON scenario against a fresh registry
    Replay(ReplayOpts),
    /// Validate a tracker config file
    CheckConfig(CheckConfigOpts),
}

#[derive(clap::Args)]
pub struct ReplayOpts {
    /// Scenario file (JSON)
    pub scenario: PathBuf,

    /// Agent to treat as the local one (overrides the scenario)
    #[arg(long)]
    pub local: Option<String>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct CheckConfigOpts {
    /// Config file to validate
    pub path: PathBuf,
}

/// Load the config file if one was given, then apply CLI overrides.
pub fn resolve_config(
    path: Option<&Path>,
    settle_delay_ms: Option<u64>,
) -> anyhow::Result<TrackerConfig> {
    let mut config = match path {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(ms) = settle_delay_ms {
        config.settle_delay_ms = ms;
    }
    config.validate().context("invalid config after overrides")?;
    Ok(config)
}
