use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use delaymeter::agent::Agent;
use delaymeter::config::Config;

/// Collects per-interval bandwidth and delay measurements from TCP producers.
#[derive(Parser)]
#[command(name = "delaymeter", version, about)]
struct Cli {
    /// TCP port to accept producer connections on.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = load_config(cli.config.as_deref())?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        port = cli.port,
        health = cfg.health.is_enabled(),
        "starting delaymeter",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg, cli.port).await })
}

/// Loads the config file, or validated defaults when none is given.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        let cfg = Config::default();
        cfg.validate().context("validating default config")?;
        return Ok(cfg);
    };

    Config::load(path).with_context(|| format!("loading config from {}", path.display()))
}

async fn run(cfg: Config, port: u16) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    // Start the agent.
    let mut agent = Agent::new(cfg, port)?;
    agent.start().await?;

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown.
    agent.stop().await?;

    tracing::info!("delaymeter stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_zero_is_rejected() {
        let err = Cli::try_parse_from(["delaymeter", "0"])
            .err()
            .expect("port 0 rejected");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_port_and_options_parse() {
        let cli = Cli::try_parse_from(["delaymeter", "5000", "-c", "dm.yaml"]).expect("parse");
        assert_eq!(cli.port, 5000);
        assert_eq!(cli.config, Some(PathBuf::from("dm.yaml")));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_port_is_required() {
        assert!(Cli::try_parse_from(["delaymeter"]).is_err());
    }

    #[test]
    fn test_defaults_without_config_file() {
        let cfg = load_config(None).expect("defaults");
        assert!(!cfg.health.is_enabled());
    }
}
