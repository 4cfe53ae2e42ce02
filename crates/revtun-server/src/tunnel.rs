//! The tunnel object: one control socket, a bounded pool of idle data
//! sockets, and the set of proxies it is currently serving (§3, §4.5).
//!
//! Grounded on `original_source/svr.go`'s `tunnel` type for the algorithm
//! (GetFreeTunnel's poll-then-wait-then-refill shape, the teardown
//! sequence) and on the teacher's `gateway/listener.rs` for the
//! spawn-a-guarded-task-per-socket idiom.

use crate::proxy::Proxy;
use crate::registry::TunnelRegistry;
use revtun_core::{
    codec, message::NewDataRequestPayload, Envelope, ShutdownGate, TunnelError, TunnelResult,
    FREE_TUNNEL_TIMEOUT_MS, TUNNEL_POOL_CAPACITY,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

pub type ProxyId = u64;

pub struct Tunnel {
    pub topic: String,
    out_tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    pool_tx: Mutex<Option<mpsc::Sender<TcpStream>>>,
    pool_rx: Mutex<Option<mpsc::Receiver<TcpStream>>>,
    proxies: Mutex<HashMap<ProxyId, Arc<Proxy>>>,
    next_proxy_id: AtomicU64,
    gate: ShutdownGate,
    writer_gate: ShutdownGate,
    reader_gate: ShutdownGate,
}

impl Tunnel {
    /// Accept ownership of a freshly validated `OutRequest` control socket,
    /// spawn its writer/reader/teardown tasks, and prime the idle pool with
    /// one `NewDataRequest` (§4.5 "Startup").
    pub fn spawn(topic: String, control: TcpStream, registry: Arc<TunnelRegistry>) -> Arc<Tunnel> {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Envelope>();
        let (pool_tx, pool_rx) = mpsc::channel::<TcpStream>(TUNNEL_POOL_CAPACITY);
        let (read_half, write_half) = control.into_split();

        let tunnel = Arc::new(Tunnel {
            topic: topic.clone(),
            out_tx: Mutex::new(Some(out_tx.clone())),
            pool_tx: Mutex::new(Some(pool_tx)),
            pool_rx: Mutex::new(Some(pool_rx)),
            proxies: Mutex::new(HashMap::new()),
            next_proxy_id: AtomicU64::new(0),
            gate: ShutdownGate::new(),
            writer_gate: ShutdownGate::new(),
            reader_gate: ShutdownGate::new(),
        });

        tokio::spawn(run_writer(
            write_half,
            out_rx,
            tunnel.gate.clone(),
            tunnel.writer_gate.clone(),
        ));
        tokio::spawn(run_reader(
            read_half,
            out_tx.clone(),
            tunnel.gate.clone(),
            tunnel.reader_gate.clone(),
            topic.clone(),
        ));
        tokio::spawn(run_teardown(tunnel.clone(), registry));

        tracing::info!(topic = %topic, "tunnel registered");

        let prime = tunnel.clone();
        tokio::spawn(async move {
            let _ = prime.request_new_data().await;
        });

        tunnel
    }

    pub fn begin_shutdown(&self) {
        self.gate.begin();
    }

    pub async fn wait_shutdown_complete(&self) {
        self.gate.wait_complete().await;
    }

    async fn request_new_data(&self) -> TunnelResult<()> {
        let guard = self.out_tx.lock().await;
        let tx = guard.as_ref().ok_or(TunnelError::TunnelClosing)?;
        let magic = revtun_core::magic::generate_magic();
        let _ = tx.send(Envelope::NewDataRequest(NewDataRequestPayload {
            magic,
            topic: self.topic.clone(),
        }));
        Ok(())
    }

    /// Non-blocking reservation of one idle-pool slot (§4.5
    /// "RegisterDataConn"). Returns a permit rather than consuming the
    /// socket directly, so the caller can write the `OutDataRequest` ack
    /// onto the still-owned socket *before* it becomes visible to any
    /// `GetFreeTunnel` waiter — reserving capacity first, then sending,
    /// keeps the wire order (ack, then later `DataActiveRequest`) correct
    /// without ever touching the socket on a `PoolFull`/`TunnelClosing`
    /// failure.
    pub async fn reserve_pool_slot(&self) -> TunnelResult<mpsc::OwnedPermit<TcpStream>> {
        let guard = self.pool_tx.lock().await;
        let tx = guard.as_ref().ok_or(TunnelError::TunnelClosing)?.clone();
        drop(guard);
        tx.try_reserve_owned().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TunnelError::PoolFull,
            mpsc::error::TrySendError::Closed(_) => TunnelError::TunnelClosing,
        })
    }

    /// Acquire an idle data socket for a proxy (§4.5 "GetFreeTunnel").
    pub async fn get_free_tunnel(&self) -> TunnelResult<TcpStream> {
        {
            let mut guard = self.pool_rx.lock().await;
            let rx = guard.as_mut().ok_or(TunnelError::TunnelClosing)?;
            match rx.try_recv() {
                Ok(sock) => {
                    drop(guard);
                    self.request_new_data().await?;
                    return Ok(sock);
                }
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(TunnelError::TunnelClosing)
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }
        }

        self.request_new_data().await?;

        let sock = {
            let mut guard = self.pool_rx.lock().await;
            let rx = guard.as_mut().ok_or(TunnelError::TunnelClosing)?;
            match tokio::time::timeout(Duration::from_millis(FREE_TUNNEL_TIMEOUT_MS), rx.recv())
                .await
            {
                Ok(Some(sock)) => sock,
                Ok(None) => return Err(TunnelError::TunnelClosing),
                Err(_) => return Err(TunnelError::NoFreeTunnel),
            }
        };

        self.request_new_data().await?;
        Ok(sock)
    }

    pub async fn add_proxy(&self, proxy: Arc<Proxy>) -> ProxyId {
        let id = self.next_proxy_id.fetch_add(1, Ordering::Relaxed);
        self.proxies.lock().await.insert(id, proxy);
        id
    }

    pub async fn remove_proxy(&self, id: ProxyId) {
        self.proxies.lock().await.remove(&id);
    }
}

async fn run_writer(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut out_rx: mpsc::UnboundedReceiver<Envelope>,
    gate: ShutdownGate,
    writer_gate: ShutdownGate,
) {
    loop {
        tokio::select! {
            _ = gate.wait_begin() => break,
            msg = out_rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = codec::write_msg(&mut write_half, &m).await {
                            tracing::warn!(error = %e, "tunnel writer failed, triggering shutdown");
                            gate.begin();
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    writer_gate.complete();
}

async fn run_reader(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    out_tx: mpsc::UnboundedSender<Envelope>,
    gate: ShutdownGate,
    reader_gate: ShutdownGate,
    topic: String,
) {
    loop {
        tokio::select! {
            _ = gate.wait_begin() => break,
            res = codec::read_msg(&mut read_half) => {
                match res {
                    Ok(Envelope::Ping(_)) => {
                        let _ = out_tx.send(Envelope::pong());
                    }
                    Ok(other) => {
                        tracing::debug!(topic = %topic, msg_type = %other.msg_type(), "ignoring unexpected control-plane message");
                    }
                    Err(e) => {
                        tracing::debug!(topic = %topic, error = %e, "tunnel reader ending");
                        gate.begin();
                        break;
                    }
                }
            }
        }
    }
    reader_gate.complete();
}

async fn run_teardown(tunnel: Arc<Tunnel>, registry: Arc<TunnelRegistry>) {
    tunnel.gate.wait_begin().await;

    {
        let mut guard = tunnel.out_tx.lock().await;
        guard.take();
    }
    {
        let mut guard = tunnel.pool_tx.lock().await;
        guard.take();
    }
    {
        let mut guard = tunnel.pool_rx.lock().await;
        if let Some(mut rx) = guard.take() {
            rx.close();
            while let Ok(sock) = rx.try_recv() {
                drop(sock);
            }
        }
    }
    {
        let proxies = tunnel.proxies.lock().await;
        for proxy in proxies.values() {
            proxy.begin_shutdown();
        }
    }

    tunnel.writer_gate.wait_complete().await;
    tunnel.reader_gate.wait_complete().await;

    registry.unregister_if_current(&tunnel.topic, &tunnel).await;
    tunnel.gate.complete();
    tracing::info!(topic = %tunnel.topic, "tunnel torn down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TunnelRegistry;

    async fn dummy_stream_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
        (accept_res.unwrap().0, connect_res.unwrap())
    }

    #[tokio::test]
    async fn get_free_tunnel_times_out_when_pool_empty() {
        let registry = TunnelRegistry::new();
        let (control, _peer) = dummy_stream_pair().await;
        let tunnel = Tunnel::spawn("t1".into(), control, registry);

        // Drain the NewDataRequest primed at startup so the pool stays
        // empty; no outward agent will ever answer it in this test.
        let err = tunnel.get_free_tunnel().await.unwrap_err();
        assert!(matches!(err, TunnelError::NoFreeTunnel));

        tunnel.begin_shutdown();
        tunnel.wait_shutdown_complete().await;
    }

    #[tokio::test]
    async fn get_free_tunnel_returns_pooled_socket_immediately() {
        let registry = TunnelRegistry::new();
        let (control, _peer) = dummy_stream_pair().await;
        let tunnel = Tunnel::spawn("t1".into(), control, registry);

        let (data_sock, _data_peer) = dummy_stream_pair().await;
        let permit = tunnel.reserve_pool_slot().await.unwrap();
        permit.send(data_sock);

        let got = tunnel.get_free_tunnel().await;
        assert!(got.is_ok());

        tunnel.begin_shutdown();
        tunnel.wait_shutdown_complete().await;
    }

    #[tokio::test]
    async fn reserve_pool_slot_reports_pool_full_at_capacity() {
        let registry = TunnelRegistry::new();
        let (control, _peer) = dummy_stream_pair().await;
        let tunnel = Tunnel::spawn("t1".into(), control, registry);

        let mut permits = Vec::new();
        for _ in 0..TUNNEL_POOL_CAPACITY {
            let (data_sock, _peer) = dummy_stream_pair().await;
            let permit = tunnel.reserve_pool_slot().await.unwrap();
            permit.send(data_sock);
        }
        let _ = &mut permits;

        let err = tunnel.reserve_pool_slot().await.unwrap_err();
        assert!(matches!(err, TunnelError::PoolFull));

        tunnel.begin_shutdown();
        tunnel.wait_shutdown_complete().await;
    }

    #[tokio::test]
    async fn begin_shutdown_fails_new_reservations() {
        let registry = TunnelRegistry::new();
        let (control, _peer) = dummy_stream_pair().await;
        let tunnel = Tunnel::spawn("t1".into(), control, registry);

        tunnel.begin_shutdown();
        tunnel.wait_shutdown_complete().await;

        let err = tunnel.reserve_pool_slot().await.unwrap_err();
        assert!(matches!(err, TunnelError::TunnelClosing));
    }
}
