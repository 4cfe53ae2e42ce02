//! Tracks the set of client sessions a listener has spawned, so graceful
//! shutdown can broadcast teardown and wait for the last one to finish
//! (§4.9).
//!
//! Grounded on `original_source/in/in.go::control` (`Add`/`Del`/`Shutdown`/
//! `WaitComplele`), with the source's 100ms poll loop replaced by a
//! `tokio::sync::Notify`-backed countdown per SPEC_FULL.md §9 "Polled wait
//! for empty" — the same restructuring applied to the outward agent's
//! `ConnectionRegistry`.

use crate::session::Session;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

pub type SessionId = u64;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    empty: Notify,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add(self: &Arc<Self>, session: Arc<Session>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().await.insert(id, session);
        id
    }

    pub async fn remove(&self, id: SessionId) {
        let mut guard = self.sessions.lock().await;
        guard.remove(&id);
        if guard.is_empty() {
            self.empty.notify_waiters();
        }
    }

    pub async fn shutdown_all(&self) {
        let guard = self.sessions.lock().await;
        for session in guard.values() {
            session.begin_shutdown();
        }
    }

    /// See `ConnectionRegistry::wait_until_empty` in the outward agent for
    /// why `notified()` is created before the emptiness check.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.empty.notified();
            if self.sessions.lock().await.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use revtun_core::ShutdownGate;

    fn dummy_network() -> Network {
        Network {
            server_host: "127.0.0.1".into(),
            server_port: 1,
            bind: "127.0.0.1".into(),
            port: 1,
            topic: "default".into(),
        }
    }

    #[tokio::test]
    async fn wait_until_empty_resolves_immediately_when_empty() {
        let registry = SessionRegistry::new();
        tokio::time::timeout(std::time::Duration::from_millis(100), registry.wait_until_empty())
            .await
            .expect("should resolve immediately");
    }

    #[tokio::test]
    async fn remove_wakes_wait_until_empty() {
        let registry = SessionRegistry::new();
        let session = Arc::new(Session::new_for_test(dummy_network(), ShutdownGate::new()));
        let id = registry.add(session).await;

        let waiter_registry = registry.clone();
        let waiter = tokio::spawn(async move {
            waiter_registry.wait_until_empty().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        registry.remove(id).await;

        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }
}
