//! revtun-outward: the outward agent (O). Runs next to the backend
//! service; dials out to the rendezvous server and maintains one
//! [`SessionGroup`] per configured network (§1, §2, §4.7).

mod config;
mod connection;
mod registry;
mod session_group;

use clap::Parser;
use config::OutwardConfig;
use session_group::SessionGroup;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// revtun-outward — reverse tunnel outward agent
#[derive(Parser, Debug)]
#[command(name = "revtun-outward", version, about = "Reverse tunnel outward agent")]
struct Cli {
    /// Config file path (TOML). Missing path or file ⇒ defaults apply.
    #[arg(long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config_path = cli.config.as_ref().map(PathBuf::from);
    let config = match OutwardConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), networks = config.networks.len(), "starting revtun-outward");

    let groups: Vec<_> = config
        .networks
        .into_iter()
        .map(|network| {
            SessionGroup::new(
                network,
                Duration::from_millis(config.retry_interval_ms),
                Duration::from_millis(config.heartbeat_interval_ms),
                Duration::from_millis(config.heartbeat_timeout_ms),
            )
        })
        .collect();

    let mut handles = Vec::with_capacity(groups.len());
    for group in &groups {
        let group = group.clone();
        handles.push(tokio::spawn(async move { group.run().await }));
    }

    shutdown_signal().await;
    info!("received shutdown signal");
    for group in &groups {
        group.begin_shutdown();
    }

    for handle in handles {
        let _ = handle.await;
    }

    info!("revtun-outward stopped");
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Wait for SIGTERM or SIGINT (Ctrl+C) (§6 "Exit codes").
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
