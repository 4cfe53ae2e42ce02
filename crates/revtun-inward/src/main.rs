//! revtun-inward: the inward agent (I). Accepts local client traffic and,
//! for each connection, dials the rendezvous server to request a matched
//! pipe (§1, §2, §4.9).

mod config;
mod registry;
mod session;

use clap::Parser;
use config::{InwardConfig, Network};
use registry::SessionRegistry;
use revtun_core::ShutdownGate;
use session::{run_session, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// revtun-inward — reverse tunnel inward agent
#[derive(Parser, Debug)]
#[command(name = "revtun-inward", version, about = "Reverse tunnel inward agent")]
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
    let config = match InwardConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), networks = config.networks.len(), "starting revtun-inward");

    let registry = SessionRegistry::new();
    let abort_gate = ShutdownGate::new();

    let mut listen_handles = Vec::with_capacity(config.networks.len());
    for network in config.networks {
        let addr = network.bind_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, %addr, "failed to bind");
                std::process::exit(1);
            }
        };
        info!(%addr, topic = %network.topic, "inward listener bound");

        let registry = registry.clone();
        let abort_gate = abort_gate.clone();
        listen_handles.push(tokio::spawn(accept_loop(listener, network, registry, abort_gate)));
    }

    shutdown_signal().await;
    info!("received shutdown signal");
    abort_gate.begin();

    for handle in listen_handles {
        let _ = handle.await;
    }

    registry.shutdown_all().await;
    registry.wait_until_empty().await;

    info!("revtun-inward stopped");
}

async fn accept_loop(
    listener: TcpListener,
    network: Network,
    registry: Arc<SessionRegistry>,
    abort_gate: ShutdownGate,
) {
    let network = Arc::new(network);
    loop {
        let accepted = tokio::select! {
            _ = abort_gate.wait_begin() => break,
            res = listener.accept() => res,
        };

        let (sock, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        tracing::debug!(%peer, topic = %network.topic, "accepted client connection");

        let session = Arc::new(Session::new((*network).clone(), sock));
        let id = registry.add(session.clone()).await;
        let registry = registry.clone();
        tokio::spawn(async move {
            run_session(session).await;
            registry.remove(id).await;
        });
    }
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
