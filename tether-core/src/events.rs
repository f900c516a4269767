//! Typed event bus shared by the HTTP and socket clients.
//!
//! Two ways to listen:
//! - `subscribe()` hands out a tokio broadcast receiver of every
//!   `ClientEvent`, for async consumers that want the full stream.
//! - `on(name, callback)` registers a synchronous callback for one event
//!   name (a lifecycle name such as `"connect"` or a server message type such
//!   as `"chat"`). It returns a `ListenerHandle` whose `unsubscribe()` removes
//!   the callback again.
//!
//! A panicking callback is isolated: the remaining callbacks still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Socket connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Waiting for the backoff timer before the next connection attempt.
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the client layer announces to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The socket moved between connection states.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The socket finished its handshake.
    Connected,
    /// The socket closed.
    Disconnected { code: u16, reason: String },
    /// A reconnect has been scheduled.
    ReconnectAttempt { attempt: u32, delay: Duration },
    /// Reconnection gave up after this many consecutive attempts.
    ReconnectFailed { attempts: u32 },
    /// Credentials were irrecoverably rejected; the user must log in again.
    SessionExpired { reason: String },
    /// A server-pushed message that was not a reply to a pending request.
    Message {
        kind: String,
        payload: serde_json::Value,
    },
    /// A non-fatal failure worth surfacing (e.g. handshake error).
    Error { message: String },
}

/// Event name for `ClientEvent::SessionExpired`.
pub const SESSION_EXPIRED: &str = "auth:logout";

impl ClientEvent {
    /// Name used to route the event to `on(name, ..)` listeners.
    pub fn name(&self) -> &str {
        match self {
            Self::StateChanged { .. } => "state",
            Self::Connected => "connect",
            Self::Disconnected { .. } => "disconnect",
            Self::ReconnectAttempt { .. } => "reconnect_attempt",
            Self::ReconnectFailed { .. } => "reconnect_failed",
            Self::SessionExpired { .. } => SESSION_EXPIRED,
            Self::Message { kind, .. } => kind,
            Self::Error { .. } => "error",
        }
    }
}

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_name: HashMap<String, Vec<(u64, Callback)>>,
}

struct Inner {
    sender: broadcast::Sender<ClientEvent>,
    listeners: Mutex<Listeners>,
}

/// Client-wide event bus.
///
/// Cloning is cheap; all clones share the same listeners and channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a bus whose broadcast channel buffers `capacity` events.
    ///
    /// Broadcast subscribers that fall further behind receive `Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.sender.subscribe()
    }

    /// Register `callback` for events named `name`.
    pub fn on<F>(&self, name: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = match self.inner.listeners.lock() {
            Ok(mut listeners) => {
                listeners.next_id += 1;
                let id = listeners.next_id;
                listeners
                    .by_name
                    .entry(name.to_string())
                    .or_default()
                    .push((id, Arc::new(callback)));
                id
            }
            Err(_) => {
                warn!("event_bus: listener registry poisoned, dropping listener for {name}");
                0
            }
        };

        ListenerHandle {
            bus: Arc::downgrade(&self.inner),
            name: name.to_string(),
            id,
        }
    }

    /// Deliver an event to broadcast subscribers and named listeners.
    pub fn emit(&self, event: ClientEvent) {
        let name = event.name().to_string();

        // Snapshot so callbacks can register/unregister without deadlocking.
        let callbacks: Vec<Callback> = match self.inner.listeners.lock() {
            Ok(listeners) => listeners
                .by_name
                .get(&name)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                warn!("event_bus: listener for {name} panicked");
            }
        }

        match self.inner.sender.send(event) {
            Ok(count) => debug!(
                "event_bus: emitted {name} to {count} subscriber(s), {} listener(s)",
                callbacks.len()
            ),
            Err(_) => debug!("event_bus: emitted {name} to {} listener(s)", callbacks.len()),
        }
    }

    /// Number of live broadcast subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Number of callbacks registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .map(|l| l.by_name.get(name).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Returned by `EventBus::on`; removes the listener when unsubscribed.
///
/// Dropping the handle without calling `unsubscribe` leaves the listener in
/// place.
#[must_use = "keep the handle to be able to remove the listener"]
pub struct ListenerHandle {
    bus: Weak<Inner>,
    name: String,
    id: u64,
}

impl ListenerHandle {
    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let Ok(mut listeners) = inner.listeners.lock() else {
            return false;
        };
        let Some(list) = listeners.by_name.get_mut(&self.name) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.by_name.remove(&self.name);
        }
        removed
    }

    /// Event name this handle listens to.
    pub fn name(&self) -> &str {
        &self.name
    }
}
