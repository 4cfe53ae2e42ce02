//! Map of topic → the tunnel currently serving it (§3, §4.5).
//!
//! Grounded on the teacher's `relay::registry::PeerRegistry` shape (an
//! `Arc<RwLock<HashMap<..>>>` with register/unregister/get) generalized
//! from fingerprint→peer to topic→tunnel, plus the original source's
//! `ControlRegistry` replace-and-teardown-old semantics.

use crate::tunnel::Tunnel;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<String, Arc<Tunnel>>>,
}

impl TunnelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tunnels: RwLock::new(HashMap::new()),
        })
    }

    pub async fn get(&self, topic: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.read().await.get(topic).cloned()
    }

    /// Install a freshly accepted control socket as the tunnel for `topic`.
    /// If a tunnel is already registered for this topic, it is replaced:
    /// the new entry is installed first, then the old tunnel's teardown is
    /// triggered (§4.5 "Registry replace-on-reregister guard" — the old
    /// tunnel's own teardown can never clobber this new entry, because
    /// `unregister_if_current` only removes an entry that still points at
    /// the tunnel asking to be removed).
    pub async fn register(self: &Arc<Self>, topic: String, control: TcpStream) -> Arc<Tunnel> {
        let new_tunnel = Tunnel::spawn(topic.clone(), control, self.clone());

        let old = {
            let mut map = self.tunnels.write().await;
            map.insert(topic.clone(), new_tunnel.clone())
        };

        if let Some(old_tunnel) = old {
            tracing::info!(topic = %topic, "replacing existing tunnel for topic");
            old_tunnel.begin_shutdown();
        }

        new_tunnel
    }

    /// Remove `topic`'s entry, but only if it still points at `tunnel`.
    /// This is what makes topic replacement race-free: a tunnel that has
    /// already been superseded can finish tearing down without deleting
    /// its successor's registration.
    pub async fn unregister_if_current(&self, topic: &str, tunnel: &Arc<Tunnel>) {
        let mut map = self.tunnels.write().await;
        if let Some(current) = map.get(topic) {
            if Arc::ptr_eq(current, tunnel) {
                map.remove(topic);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.tunnels.read().await.len()
    }
}
