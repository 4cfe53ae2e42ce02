//! Two-phase begin/complete shutdown signaling (§4.2).
//!
//! Both phases are idempotent and non-blocking to signal: `begin()`/
//! `complete()` flip a `watch` cell from `false` to `true` exactly once,
//! which is safe to call from inside a held registry lock while iterating
//! a broadcast shutdown (§5, §9 "Broadcast shutdown").

use tokio::sync::watch;

/// A single closable one-shot signal backed by a `watch<bool>` cell. Any
/// number of independent waiters may clone a receiver and wait; a waiter
/// that arrives after the signal already fired sees it immediately.
#[derive(Clone)]
struct Signal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Signal {
    fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    fn fire(&self) {
        let _ = self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });
    }

    fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

/// A full shutdown gate: exposes both `begin` and `complete`. Used by
/// objects that originate their own teardown (tunnels, session-group
/// iterations).
#[derive(Clone)]
pub struct ShutdownGate {
    begin: Signal,
    complete: Signal,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self {
            begin: Signal::new(),
            complete: Signal::new(),
        }
    }

    /// Request teardown to start. Idempotent; safe to call under a lock.
    pub fn begin(&self) {
        self.begin.fire();
    }

    pub fn is_begun(&self) -> bool {
        self.begin.is_fired()
    }

    /// Wait until `begin()` has been called (by anyone, any number of times).
    pub async fn wait_begin(&self) {
        self.begin.wait().await;
    }

    /// Signal that teardown has finished. Idempotent.
    pub fn complete(&self) {
        self.complete.fire();
    }

    pub fn is_complete(&self) -> bool {
        self.complete.is_fired()
    }

    /// Wait until `complete()` has been called.
    pub async fn wait_complete(&self) {
        self.complete.wait().await;
    }

    /// A read-only view exposing only `complete`, for a parent that should
    /// observe a child's finalization but never request its teardown.
    pub fn completion_only(&self) -> CompletionSignal {
        CompletionSignal {
            complete: self.complete.clone(),
        }
    }
}

impl Default for ShutdownGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A one-shot gate exposing only `complete` (§4.2 "one-shot gates").
#[derive(Clone)]
pub struct CompletionSignal {
    complete: Signal,
}

impl CompletionSignal {
    pub fn signal(&self) {
        self.complete.fire();
    }

    pub fn is_signaled(&self) -> bool {
        self.complete.is_fired()
    }

    pub async fn wait(&self) {
        self.complete.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn begin_is_idempotent_and_observable() {
        let gate = ShutdownGate::new();
        assert!(!gate.is_begun());
        gate.begin();
        gate.begin();
        assert!(gate.is_begun());
        gate.wait_begin().await;
    }

    #[tokio::test]
    async fn waiter_that_arrives_after_fire_does_not_hang() {
        let gate = ShutdownGate::new();
        gate.begin();
        tokio::time::timeout(Duration::from_millis(100), gate.wait_begin())
            .await
            .expect("wait_begin should resolve immediately once already fired");
    }

    #[tokio::test]
    async fn waiter_wakes_on_later_fire() {
        let gate = Arc::new(ShutdownGate::new());
        let waiter_gate = gate.clone();
        let waiter = tokio::spawn(async move {
            waiter_gate.wait_begin().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.begin();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter task should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn completion_only_cannot_begin_but_observes_complete() {
        let gate = ShutdownGate::new();
        let completion = gate.completion_only();
        assert!(!completion.is_signaled());
        gate.complete();
        completion.wait().await;
        assert!(completion.is_signaled());
    }
}
