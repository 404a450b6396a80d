//! avatrack: replay avatar lifecycle scenarios against the tracker and
//! validate tracker configuration files.

use anyhow::Context;
use avatrack_core::{AgentId, TrackerConfig};
use clap::Parser;

mod cli;
mod replay;
mod scenario;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("AVATRACK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Replay(opts) => {
            let config = cli::resolve_config(args.config.as_deref(), args.settle_delay_ms)?;
            let scenario = scenario::Scenario::load(&opts.scenario)?;
            let local = opts.local.map(AgentId::new).or_else(|| scenario.local.clone());

            let report = tokio::select! {
                report = replay::replay(&scenario, config, local) => report?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("interrupted");
                    std::process::exit(130);
                }
            };

            if opts.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }

            let failures = report.check(&scenario.expect);
            if !failures.is_empty() {
                for failure in &failures {
                    eprintln!("expectation failed: {failure}");
                }
                std::process::exit(1);
            }
        }
        cli::Command::CheckConfig(opts) => {
            let config = TrackerConfig::load(&opts.path)
                .with_context(|| format!("invalid config {}", opts.path.display()))?;
            println!("{} ok", opts.path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
