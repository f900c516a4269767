//! Shared test utilities for socket integration tests.
//!
//! `MockConnector` hands the manager an in-memory link and gives the test the
//! server end of it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use tether_core::config::SocketConfig;
use tether_core::error::{TetherError, TetherResult};
use tether_core::events::{ClientEvent, EventBus};
use tether_socket::{Connector, Link, Outgoing, SocketManager, TransportEvent};

pub const URL: &str = "ws://mock.local/ws";

/// Server end of one accepted link.
pub struct ServerSide {
    pub from_client: mpsc::UnboundedReceiver<Outgoing>,
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerSide {
    /// Next thing the client wrote, text or close.
    pub async fn recv(&mut self) -> Outgoing {
        tokio::time::timeout(Duration::from_secs(120), self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client link dropped")
    }

    /// Next text frame that is not a heartbeat ping, parsed.
    pub async fn recv_frame(&mut self) -> Value {
        loop {
            match self.recv().await {
                Outgoing::Text(text) => {
                    let frame: Value = serde_json::from_str(&text).expect("client sent invalid json");
                    if frame["type"] != "ping" {
                        return frame;
                    }
                }
                Outgoing::Close { code, reason } => {
                    panic!("expected a text frame, got close {code}: {reason}")
                }
            }
        }
    }

    pub fn send_json(&self, frame: Value) {
        self.send_text(&frame.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(TransportEvent::Text(text.to_string()));
    }

    /// Reply to the correlated request `frame` with `payload`.
    pub fn reply(&self, frame: &Value, payload: Value) {
        self.send_json(serde_json::json!({
            "type": frame["type"],
            "id": frame["id"],
            "payload": payload,
        }));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }
}

/// In-memory connector.
pub struct MockConnector {
    refuse: AtomicBool,
    delay: Mutex<Duration>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
    accepted: mpsc::UnboundedSender<ServerSide>,
}

/// Receives the server ends of accepted links.
pub struct Acceptor {
    accepted: mpsc::UnboundedReceiver<ServerSide>,
}

impl Acceptor {
    pub async fn accept(&mut self) -> ServerSide {
        tokio::time::timeout(Duration::from_secs(300), self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, Acceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refuse: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            attempts: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            accepted: tx,
        });
        (connector, Acceptor { accepted: rx })
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Hold every attempt open for `delay` before it resolves.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> TetherResult<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TetherError::Network("connection refused".into()));
        }

        let (outgoing, from_client) = mpsc::unbounded_channel();
        let (to_client, incoming) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerSide {
            from_client,
            to_client,
        });
        Ok(Link { outgoing, incoming })
    }
}

/// Config with jitter off and a heartbeat slow enough to stay out of the way.
pub fn test_config() -> SocketConfig {
    SocketConfig {
        heartbeat_interval_ms: 600_000,
        response_timeout_ms: 5_000,
        ..SocketConfig::default()
    }
}

pub fn manager_with(config: SocketConfig) -> (SocketManager, Arc<MockConnector>, Acceptor) {
    let (connector, acceptor) = MockConnector::new();
    let manager =
        SocketManager::with_connector(config, URL, EventBus::new(256), connector.clone());
    (manager, connector, acceptor)
}

pub fn manager() -> (SocketManager, Arc<MockConnector>, Acceptor) {
    manager_with(test_config())
}

/// Wait for the first event matching `pred`, skipping the rest.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("timed out waiting for event")
}

/// Count the pings the client has written so far; panics on anything else.
pub fn count_pings(server: &mut ServerSide) -> usize {
    let mut pings = 0;
    while let Ok(outgoing) = server.from_client.try_recv() {
        match outgoing {
            Outgoing::Text(text) => {
                let frame: Value = serde_json::from_str(&text).expect("client sent invalid json");
                assert_eq!(frame["type"], "ping", "unexpected frame {frame}");
                pings += 1;
            }
            Outgoing::Close { code, reason } => panic!("unexpected close {code}: {reason}"),
        }
    }
    pings
}

/// Drain whatever is already buffered.
pub fn drain(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
