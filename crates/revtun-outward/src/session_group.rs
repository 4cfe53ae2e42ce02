//! The outward agent's per-network supervisor: a reconnecting control
//! connection with heartbeat and data-channel fan-out (§3 "Session group",
//! §4.7).
//!
//! Grounded on `original_source/out/out.go::sessionGroup` for the
//! dial-register-spawn-wait-retry loop shape, restructured so that a
//! `SessionGroup` never holds a back-pointer into the connections it
//! spawns — it only ever reaches them through its owned
//! [`ConnectionRegistry`] (§9 "Cyclic references").

use crate::config::Network;
use crate::connection::{run_connection, Connection};
use crate::registry::ConnectionRegistry;
use revtun_core::{
    codec,
    magic::generate_magic,
    message::{OutDataRequestPayload, OutRequestPayload, PROTOCOL_VERSION},
    Envelope, MsgType, ShutdownGate, TunnelError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

/// One per configured network; runs for the life of the process,
/// internally reconnecting on every control-connection failure.
pub struct SessionGroup {
    network: Network,
    retry_interval: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    /// Distinguishes "retry forever" from "stop for good" (§3).
    break_flag: AtomicBool,
    /// Fired to abort the whole supervisor, including mid-retry sleeps.
    abort_gate: ShutdownGate,
}

impl SessionGroup {
    pub fn new(
        network: Network,
        retry_interval: Duration,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            network,
            retry_interval,
            heartbeat_interval,
            heartbeat_timeout,
            break_flag: AtomicBool::new(false),
            abort_gate: ShutdownGate::new(),
        })
    }

    /// Request the supervisor to stop retrying and exit (used for process
    /// shutdown, not per-iteration reconnects).
    pub fn begin_shutdown(&self) {
        self.break_flag.store(true, Ordering::SeqCst);
        self.abort_gate.begin();
    }

    /// Run the reconnect loop until `begin_shutdown` is called (§4.7
    /// "Iteration").
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.break_flag.load(Ordering::SeqCst) {
                break;
            }

            let control = tokio::select! {
                _ = self.abort_gate.wait_begin() => break,
                res = TcpStream::connect(self.network.server_addr()) => res,
            };

            let control = match control {
                Ok(sock) => sock,
                Err(e) => {
                    tracing::warn!(server = %self.network.server_addr(), error = %e, "dial failed, retrying");
                    if self.sleep_or_abort().await {
                        break;
                    }
                    continue;
                }
            };

            if self.run_iteration(control).await {
                break;
            }

            if self.break_flag.load(Ordering::SeqCst) {
                break;
            }
            tracing::info!(topic = %self.network.topic, "retrying connection");
            if self.sleep_or_abort().await {
                break;
            }
        }
    }

    /// Sleep for `retry_interval`, interruptible by `abort_gate`. Returns
    /// `true` if the abort fired during the sleep.
    async fn sleep_or_abort(&self) -> bool {
        tokio::select! {
            _ = self.abort_gate.wait_begin() => true,
            _ = tokio::time::sleep(self.retry_interval) => false,
        }
    }

    /// Run a single connect-register-serve iteration. Returns `true` if the
    /// process-level abort fired (caller should stop retrying).
    async fn run_iteration(self: &Arc<Self>, control: TcpStream) -> bool {
        let (mut read_half, mut write_half) = control.into_split();

        let magic = generate_magic();
        let register = Envelope::OutRequest(OutRequestPayload {
            magic: magic.clone(),
            version: PROTOCOL_VERSION.to_string(),
            topic: self.network.topic.clone(),
        });
        if let Err(e) = codec::write_msg(&mut write_half, &register).await {
            tracing::warn!(error = %e, "failed to send OutRequest");
            return false;
        }
        if let Err(e) = codec::check_response(&mut read_half, &magic, MsgType::OutRequest).await {
            tracing::warn!(error = %e, "OutRequest rejected");
            return false;
        }
        tracing::info!(topic = %self.network.topic, server = %self.network.server_addr(), "registered with rendezvous server");

        let registry = ConnectionRegistry::new();
        let (beat_tx, beat_rx) = watch::channel(());
        let write_half = Arc::new(Mutex::new(write_half));

        let iteration_gate = ShutdownGate::new();
        let heartbeat_gate = ShutdownGate::new();

        let recv_task = tokio::spawn(run_receive_loop(
            self.clone(),
            read_half,
            registry.clone(),
            beat_tx,
            iteration_gate.clone(),
        ));
        let heartbeat_task = tokio::spawn(run_heartbeat_loop(
            self.clone(),
            write_half.clone(),
            beat_rx,
            iteration_gate.clone(),
            heartbeat_gate.clone(),
        ));

        let aborted = tokio::select! {
            _ = self.abort_gate.wait_begin() => true,
            _ = iteration_gate.wait_begin() => false,
        };
        // Fire the gate unconditionally (idempotent): both the recv loop and
        // the heartbeat loop race it against their own blocking operation,
        // which is how a control-read or control-write failure, not just an
        // external abort, already got us here.
        iteration_gate.begin();

        {
            let mut w = write_half.lock().await;
            let _ = w.shutdown().await;
        }

        registry.shutdown_all().await;
        registry.wait_until_empty().await;

        heartbeat_gate.wait_complete().await;
        let _ = recv_task.await;
        let _ = heartbeat_task;

        iteration_gate.complete();
        aborted
    }
}

async fn run_receive_loop(
    group: Arc<SessionGroup>,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    registry: Arc<ConnectionRegistry>,
    beat_tx: watch::Sender<()>,
    iteration_gate: ShutdownGate,
) {
    loop {
        let msg = tokio::select! {
            _ = iteration_gate.wait_begin() => break,
            res = codec::read_msg(&mut read_half) => res,
        };

        match msg {
            Ok(Envelope::Pong(_)) => {
                let _ = beat_tx.send(());
            }
            Ok(Envelope::NewDataRequest(req)) => {
                if req.topic != group.network.topic {
                    tracing::debug!(expected = %group.network.topic, got = %req.topic, "ignoring NewDataRequest for different topic");
                    continue;
                }
                tracing::debug!(topic = %req.topic, "received NewDataRequest");
                let group = group.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    open_data_connection(group, registry).await;
                });
            }
            Ok(other) => {
                tracing::debug!(msg_type = %other.msg_type(), "ignoring unexpected control-plane message");
            }
            Err(e) => {
                tracing::debug!(error = %e, "control read ended");
                iteration_gate.begin();
                break;
            }
        }
    }
}

async fn open_data_connection(group: Arc<SessionGroup>, registry: Arc<ConnectionRegistry>) {
    let sock = match TcpStream::connect(group.network.server_addr()).await {
        Ok(sock) => sock,
        Err(e) => {
            tracing::warn!(error = %e, "failed to dial server for data connection");
            return;
        }
    };
    let mut sock = sock;

    let magic = generate_magic();
    let req = Envelope::OutDataRequest(OutDataRequestPayload {
        magic: magic.clone(),
        version: PROTOCOL_VERSION.to_string(),
        topic: group.network.topic.clone(),
    });
    if let Err(e) = codec::write_msg(&mut sock, &req).await {
        tracing::warn!(error = %e, "failed to send OutDataRequest");
        return;
    }
    if let Err(e) = codec::check_response(&mut sock, &magic, MsgType::OutDataRequest).await {
        tracing::warn!(error = %e, "OutDataRequest rejected");
        return;
    }

    let conn = Arc::new(Connection::new(group.network.clone(), sock));
    let id = registry.add(conn.clone()).await;
    run_connection(conn).await;
    registry.remove(id).await;
}

async fn run_heartbeat_loop(
    group: Arc<SessionGroup>,
    write_half: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    mut beat_rx: watch::Receiver<()>,
    iteration_gate: ShutdownGate,
    heartbeat_gate: ShutdownGate,
) {
    let mut last_pong = Instant::now();
    let mut ticker = tokio::time::interval(group.heartbeat_interval);
    ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            _ = iteration_gate.wait_begin() => break,
            changed = beat_rx.changed() => {
                match changed {
                    Ok(()) => last_pong = Instant::now(),
                    Err(_) => break,
                }
            }
            _ = ticker.tick() => {
                if last_pong.elapsed() > group.heartbeat_timeout {
                    tracing::warn!(topic = %group.network.topic, error = %TunnelError::HeartbeatLost, "declaring control connection lost");
                    iteration_gate.begin();
                    break;
                }
                let mut w = write_half.lock().await;
                if let Err(e) = codec::write_msg(&mut *w, &Envelope::ping()).await {
                    tracing::warn!(error = %e, "failed to send Ping");
                    iteration_gate.begin();
                    break;
                }
            }
        }
    }
    heartbeat_gate.complete();
}
