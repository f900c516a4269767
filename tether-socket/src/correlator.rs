//! Request/response correlation over the shared socket.
//!
//! Each correlated send registers a oneshot under a fresh id. The reader
//! settles it when a frame with the same id arrives; otherwise the waiter
//! times out and removes its own entry. Connection loss rejects everything
//! still pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use tether_core::error::{TetherError, TetherResult};

type Reply = TetherResult<Value>;

struct Pending {
    kind: String,
    created_at: Instant,
    settle: oneshot::Sender<Reply>,
}

/// Table of in-flight correlated requests.
#[derive(Default)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and register a waiter for it.
    pub fn register(&self, kind: &str) -> (u64, oneshot::Receiver<Reply>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (settle, rx) = oneshot::channel();
        let entry = Pending {
            kind: kind.to_string(),
            created_at: Instant::now(),
            settle,
        };
        match self.pending.lock() {
            Ok(mut pending) => {
                pending.insert(id, entry);
            }
            Err(_) => warn!("correlator table poisoned, request #{id} cannot be settled"),
        }
        (id, rx)
    }

    /// Settle request `id` with the server's reply. False if nothing was
    /// waiting for it.
    pub fn resolve(&self, id: u64, result: Result<Value, String>) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        debug!(
            "request #{id} ({}) settled after {}ms",
            entry.kind,
            entry.created_at.elapsed().as_millis()
        );
        let reply = result.map_err(TetherError::Remote);
        let _ = entry.settle.send(reply);
        true
    }

    /// Forget request `id` without settling it.
    pub fn cancel(&self, id: u64) -> bool {
        self.take(id).is_some()
    }

    /// Reject every pending request with the error `make_error` builds.
    pub fn reject_all(&self, make_error: impl Fn() -> TetherError) -> usize {
        let drained: Vec<(u64, Pending)> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => return 0,
        };
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.settle.send(Err(make_error()));
        }
        if count > 0 {
            debug!("rejected {count} pending request(s)");
        }
        count
    }

    /// Wait for the reply to `id`, giving up after `timeout`.
    ///
    /// On timeout the entry is removed, so a late reply is dropped.
    pub async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Reply>,
        timeout: Duration,
    ) -> TetherResult<Value> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(TetherError::SocketDisconnected),
            Err(_) => {
                self.cancel(id);
                Err(TetherError::timeout(
                    format!("socket request #{id}"),
                    started.elapsed(),
                ))
            }
        }
    }

    /// Number of requests still waiting.
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, id: u64) -> Option<Pending> {
        self.pending.lock().ok().and_then(|mut p| p.remove(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_settles_waiter() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register("chat");
        assert_eq!(correlator.len(), 1);

        assert!(correlator.resolve(id, Ok(json!({"ok": true}))));
        let reply = correlator.wait(id, rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, json!({"ok": true}));
        assert!(correlator.is_empty());
        assert!(!correlator.resolve(id, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_remote_error() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register("subscribe");
        correlator.resolve(id, Err("forbidden".into()));
        let err = correlator.wait(id, rx, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TetherError::Remote(ref m) if m == "forbidden"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register("chat");

        let err = correlator
            .wait(id, rx, Duration::from_millis(1000))
            .await
            .unwrap_err();
        match err {
            TetherError::Timeout { elapsed, .. } => assert!(elapsed >= Duration::from_millis(1000)),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn test_reject_all() {
        let correlator = Correlator::new();
        let (a, rx_a) = correlator.register("a");
        let (b, rx_b) = correlator.register("b");
        assert_ne!(a, b);

        assert_eq!(correlator.reject_all(|| TetherError::SocketDisconnected), 2);
        assert!(correlator.is_empty());
        for (id, rx) in [(a, rx_a), (b, rx_b)] {
            let err = correlator.wait(id, rx, Duration::from_secs(1)).await.unwrap_err();
            assert!(matches!(err, TetherError::SocketDisconnected));
        }
    }
}
