//! Tracks the set of data connections a session group has spawned, so a
//! reconnect iteration can broadcast shutdown to all of them and wait for
//! the last one to finalize (§3 "Session group", §4.7 step 4).
//!
//! Grounded on `original_source/out/out.go::connectionMng` (`Add`/`Del`/
//! `Shutdown`/`WaitComplele`), with the source's 100ms poll loop replaced
//! by a `tokio::sync::Notify`-backed countdown, per SPEC_FULL.md §9
//! "Polled wait for empty".

use crate::connection::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

pub type ConnectionId = u64;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    empty: Notify,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add(self: &Arc<Self>, conn: Arc<Connection>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().await.insert(id, conn);
        id
    }

    /// Remove a connection by id and wake a `wait_until_empty` waiter if
    /// this was the last one.
    pub async fn remove(&self, id: ConnectionId) {
        let mut guard = self.connections.lock().await;
        guard.remove(&id);
        if guard.is_empty() {
            self.empty.notify_waiters();
        }
    }

    /// Broadcast non-blocking shutdown to every tracked connection (§9
    /// "Broadcast shutdown" — holding the lock while signaling is safe
    /// because each signal only flips a `watch` cell).
    pub async fn shutdown_all(&self) {
        let guard = self.connections.lock().await;
        for conn in guard.values() {
            conn.begin_shutdown();
        }
    }

    /// Wait until the registry has no tracked connections left.
    ///
    /// The `notified()` future is created before the emptiness check so a
    /// `remove()` that completes between the check and the await can never
    /// fire its notification into a waiter that hasn't registered yet.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.empty.notified();
            if self.connections.lock().await.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
