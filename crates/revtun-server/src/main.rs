//! revtun-server: the rendezvous server (S). Accepts both outward-agent
//! control/data connections and inward-agent client requests, and brokers
//! them together (§1, §2).

mod config;
mod proxy;
mod registry;
mod server;
mod tunnel;

use clap::Parser;
use config::ServerConfig;
use server::Server;
use std::path::PathBuf;
use tracing::{error, info};

/// revtun-server — reverse tunnel rendezvous server
#[derive(Parser, Debug)]
#[command(name = "revtun-server", version, about = "Reverse tunnel rendezvous server")]
struct Cli {
    /// Config file path (TOML). Missing path or file ⇒ defaults apply.
    #[arg(long)]
    config: Option<String>,

    /// Override the bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config_path = cli.config.as_ref().map(PathBuf::from);
    let server_config = match ServerConfig::load(
        config_path.as_deref(),
        cli.bind.as_deref(),
        cli.port,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let addr = match server_config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid bind address");
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), %addr, "starting revtun-server");

    let server = Server::new();

    tokio::select! {
        result = server.run(addr) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("revtun-server stopped");
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
