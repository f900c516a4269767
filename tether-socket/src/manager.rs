//! Socket connection manager.
//!
//! Owns the one persistent duplex connection: connection state machine,
//! automatic reconnection with exponential backoff, heartbeat, outbound
//! queueing while disconnected, request/response correlation and routing of
//! server pushes onto the event bus.
//!
//! State transitions:
//! - `Disconnected --connect()--> Connecting --open--> Connected`
//! - `Connecting --error--> Disconnected` (then `Reconnecting` unless stopped)
//! - `Connected --disconnect()--> Disconnecting --> Disconnected`
//! - `Connected --abnormal close--> Disconnected --> Reconnecting`
//! - `Reconnecting --timer--> Connecting`

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use tether_core::config::SocketConfig;
use tether_core::constants::{close_codes, frames};
use tether_core::credentials::CredentialStore;
use tether_core::error::{TetherError, TetherResult};
use tether_core::events::{ClientEvent, ConnectionState, EventBus, ListenerHandle};

use crate::backoff::ReconnectPolicy;
use crate::correlator::Correlator;
use crate::frame::{self, Frame, Inbound};
use crate::transport::{redact, Connector, Link, Outgoing, TransportEvent, WsConnector};

/// Options for `SocketManager::send`.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Wait for a reply carrying the same id.
    pub expect_response: bool,
    /// Reply deadline; defaults to `response_timeout_ms`.
    pub timeout: Option<Duration>,
    /// Queue fire-and-forget frames while disconnected instead of dropping.
    pub queue_if_disconnected: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            expect_response: false,
            timeout: None,
            queue_if_disconnected: true,
        }
    }
}

impl SendOptions {
    /// Correlated send with the default deadline.
    pub fn request() -> Self {
        Self {
            expect_response: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Drop instead of queueing when disconnected.
    pub fn no_queue(mut self) -> Self {
        self.queue_if_disconnected = false;
        self
    }
}

/// The live link plus the generation it belongs to.
struct ActiveLink {
    generation: u64,
    outgoing: tokio::sync::mpsc::UnboundedSender<Outgoing>,
}

struct Shared {
    config: SocketConfig,
    url: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    credentials: Option<CredentialStore>,
    events: EventBus,
    correlator: Correlator,

    state: Mutex<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
    /// Frames waiting for the next connection, oldest first.
    queue: Mutex<VecDeque<String>>,
    /// Channels confirmed by the server, re-joined after reconnecting.
    channels: Mutex<BTreeSet<String>>,

    /// Consecutive reconnect attempts since the last successful open.
    reconnect_attempts: Mutex<u32>,
    /// Pings sent since the last pong.
    missed_heartbeats: Mutex<u32>,
    /// Set by `disconnect()`; suppresses reconnection.
    manual_close: AtomicBool,
    /// Set once `ReconnectFailed` has been emitted for the current cycle.
    gave_up: AtomicBool,
    /// Bumped to invalidate a pending reconnect timer.
    reconnect_epoch: AtomicU64,
    reconnect_notify: Notify,

    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

/// Persistent socket connection manager.
///
/// Cloning is cheap; clones drive the same connection.
#[derive(Clone)]
pub struct SocketManager {
    shared: Arc<Shared>,
}

impl SocketManager {
    /// Manager over the WebSocket transport.
    pub fn new(config: SocketConfig, url: impl Into<String>, events: EventBus) -> Self {
        Self::with_connector(config, url, events, Arc::new(WsConnector))
    }

    /// Manager over a custom transport.
    pub fn with_connector(
        config: SocketConfig,
        url: impl Into<String>,
        events: EventBus,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let policy = ReconnectPolicy::from_config(&config);

        Self {
            shared: Arc::new(Shared {
                config,
                url: url.into(),
                policy,
                connector,
                credentials: None,
                events,
                correlator: Correlator::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                state_tx,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                queue: Mutex::new(VecDeque::new()),
                channels: Mutex::new(BTreeSet::new()),
                reconnect_attempts: Mutex::new(0),
                missed_heartbeats: Mutex::new(0),
                manual_close: AtomicBool::new(false),
                gave_up: AtomicBool::new(false),
                reconnect_epoch: AtomicU64::new(0),
                reconnect_notify: Notify::new(),
                heartbeat_task: Mutex::new(None),
                reader_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// Read the access token from `credentials` for each handshake.
    ///
    /// Must be called before the manager is cloned or connected.
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.credentials = Some(credentials),
            None => warn!("socket manager already shared, credentials not attached"),
        }
        self
    }

    /// Replace the reconnect policy derived from config.
    ///
    /// Must be called before the manager is cloned or connected.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.policy = policy,
            None => warn!("socket manager already shared, reconnect policy not replaced"),
        }
        self
    }

    /// Open the connection.
    ///
    /// Returns once the link is open or the attempt failed. A failed attempt
    /// still schedules automatic reconnection. If an attempt is already in
    /// flight (a reconnect, or a concurrent `connect`), waits for its outcome
    /// instead of starting another; `NotConnected` if it fails.
    pub async fn connect(&self) -> TetherResult<()> {
        let shared = &self.shared;
        shared.manual_close.store(false, Ordering::SeqCst);
        shared.gave_up.store(false, Ordering::SeqCst);

        // A user connect supersedes any pending reconnect timer.
        shared.reconnect_epoch.fetch_add(1, Ordering::SeqCst);
        shared.reconnect_notify.notify_waiters();
        *shared.reconnect_attempts.lock().await = 0;

        Shared::open(shared).await
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Pending correlated requests are rejected with `SocketDisconnected`.
    /// Queued frames are kept for the next `connect()`.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.manual_close.store(true, Ordering::SeqCst);
        shared.reconnect_epoch.fetch_add(1, Ordering::SeqCst);
        shared.reconnect_notify.notify_waiters();
        if let Some(handle) = shared.reconnect_task.lock().await.take() {
            handle.abort();
        }

        let link = shared.link.lock().await.take();
        if link.is_some() {
            shared.set_state(ConnectionState::Disconnecting).await;
        }
        shared.stop_heartbeat().await;

        if let Some(link) = &link {
            let _ = link.outgoing.send(Outgoing::Close {
                code: close_codes::NORMAL,
                reason: "client disconnect".into(),
            });
        }
        if let Some(handle) = shared.reader_task.lock().await.take() {
            handle.abort();
        }

        let rejected = shared
            .correlator
            .reject_all(|| TetherError::SocketDisconnected);
        if rejected > 0 {
            debug!("disconnect rejected {rejected} pending request(s)");
        }
        shared.channels.lock().await.clear();
        shared.set_state(ConnectionState::Disconnected).await;

        if link.is_some() {
            shared.events.emit(ClientEvent::Disconnected {
                code: close_codes::NORMAL,
                reason: "client disconnect".into(),
            });
            info!("socket disconnected");
        }
    }

    /// Send a frame of `kind` with `payload`.
    ///
    /// Returns the reply payload for correlated sends, `None` otherwise.
    pub async fn send(
        &self,
        kind: &str,
        payload: Value,
        options: SendOptions,
    ) -> TetherResult<Option<Value>> {
        if frame::is_reserved(kind) {
            return Err(TetherError::Protocol(format!(
                "frame type {kind:?} is reserved"
            )));
        }
        self.shared.send_frame(kind, payload, options).await
    }

    /// Correlated send with the default deadline.
    pub async fn request(&self, kind: &str, payload: Value) -> TetherResult<Value> {
        let reply = self.send(kind, payload, SendOptions::request()).await?;
        Ok(reply.unwrap_or(Value::Null))
    }

    /// Join `channel`. Remembered and re-joined after reconnecting.
    pub async fn subscribe(&self, channel: &str) -> TetherResult<Value> {
        let reply = self
            .shared
            .send_frame(frames::SUBSCRIBE, json!({ "channel": channel }), SendOptions::request())
            .await?;
        self.shared.channels.lock().await.insert(channel.to_string());
        info!("subscribed to {channel}");
        Ok(reply.unwrap_or(Value::Null))
    }

    /// Leave `channel`.
    pub async fn unsubscribe(&self, channel: &str) -> TetherResult<Value> {
        self.shared.channels.lock().await.remove(channel);
        let reply = self
            .shared
            .send_frame(
                frames::UNSUBSCRIBE,
                json!({ "channel": channel }),
                SendOptions::request(),
            )
            .await?;
        info!("unsubscribed from {channel}");
        Ok(reply.unwrap_or(Value::Null))
    }

    /// Register a handler for server pushes of type `kind`.
    pub fn on<F>(&self, kind: &str, handler: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, handler)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Correlated requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Frames queued for the next connection.
    pub async fn queued_frames(&self) -> usize {
        self.shared.queue.lock().await.len()
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        *self.shared.reconnect_attempts.lock().await
    }

    /// Channels that will be re-joined after a reconnect.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.channels.lock().await.iter().cloned().collect()
    }
}

impl Shared {
    /// Update the state, notify watchers and emit `StateChanged`.
    ///
    /// Leaving `Connected` stops the heartbeat.
    async fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.lock().await;
            let old = *state;
            if old == new_state {
                return;
            }
            *state = new_state;
            old
        };

        info!("socket state: {old_state} -> {new_state}");
        self.state_tx.send_replace(new_state);
        if old_state == ConnectionState::Connected {
            self.stop_heartbeat().await;
        }
        self.events.emit(ClientEvent::StateChanged {
            from: old_state,
            to: new_state,
        });
    }

    /// Move to `Connecting` unless a connection is already open or opening.
    async fn begin_connect(&self) -> bool {
        let old_state = {
            let mut state = self.state.lock().await;
            match *state {
                ConnectionState::Connected | ConnectionState::Connecting => return false,
                old => {
                    *state = ConnectionState::Connecting;
                    old
                }
            }
        };
        info!("socket state: {old_state} -> connecting");
        self.state_tx.send_replace(ConnectionState::Connecting);
        self.events.emit(ClientEvent::StateChanged {
            from: old_state,
            to: ConnectionState::Connecting,
        });
        true
    }

    fn handshake_url(&self) -> String {
        let token = self
            .credentials
            .as_ref()
            .and_then(CredentialStore::access_token);
        match token {
            Some(token) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!(
                    "{}{separator}{}={}",
                    self.url,
                    self.config.token_query_param,
                    urlencoding::encode(&token)
                )
            }
            None => self.url.clone(),
        }
    }

    /// One connection attempt.
    async fn open(self: &Arc<Self>) -> TetherResult<()> {
        if !self.begin_connect().await {
            debug!("already connected or connecting, joining");
            return self.await_in_flight().await;
        }

        let url = self.handshake_url();
        info!("socket connecting to {}", redact(&url));

        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.connector.connect(&url)).await {
            Ok(result) => result,
            Err(_) => Err(TetherError::timeout("socket connect", started.elapsed())),
        };

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                warn!("socket connect failed: {e}");
                self.set_state(ConnectionState::Disconnected).await;
                self.events.emit(ClientEvent::Error {
                    message: e.to_string(),
                });
                self.schedule_reconnect().await;
                return Err(e);
            }
        };

        if self.manual_close.load(Ordering::SeqCst) {
            debug!("disconnect requested while connecting, closing new link");
            let _ = link.outgoing.send(Outgoing::Close {
                code: close_codes::NORMAL,
                reason: "client disconnect".into(),
            });
            self.set_state(ConnectionState::Disconnected).await;
            return Err(TetherError::SocketDisconnected);
        }

        self.install(link).await;
        Ok(())
    }

    /// Wait until the attempt in flight settles.
    async fn await_in_flight(&self) -> TetherResult<()> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            let current = *self.state.lock().await;
            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {}
                other => {
                    debug!("connection attempt in flight ended {other}");
                    return Err(TetherError::NotConnected);
                }
            }
            if state_rx.changed().await.is_err() {
                return Err(TetherError::NotConnected);
            }
        }
    }

    /// `open` behind a box, for use from tasks that `open` itself spawns.
    fn reopen(self: Arc<Self>) -> BoxFuture<'static, TetherResult<()>> {
        Box::pin(async move { self.open().await })
    }

    /// Adopt a freshly opened link and enter `Connected`.
    async fn install(self: &Arc<Self>, link: Link) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Link { outgoing, incoming } = link;

        *self.link.lock().await = Some(ActiveLink {
            generation,
            outgoing,
        });
        *self.reconnect_attempts.lock().await = 0;
        self.gave_up.store(false, Ordering::SeqCst);

        let reader = tokio::spawn(Shared::read_loop(self.clone(), generation, incoming));
        if let Some(old) = self.reader_task.lock().await.replace(reader) {
            old.abort();
        }

        // Holding the queue lock across the state change keeps sends issued
        // meanwhile behind the queued frames.
        {
            let mut queue = self.queue.lock().await;
            self.set_state(ConnectionState::Connected).await;
            self.events.emit(ClientEvent::Connected);
            self.start_heartbeat(generation).await;

            if !queue.is_empty() {
                info!("flushing {} queued frame(s)", queue.len());
            }
            while let Some(text) = queue.pop_front() {
                if let Err(e) = self.transmit(&text).await {
                    warn!("flush interrupted: {e}");
                    queue.push_front(text);
                    break;
                }
            }
        }

        self.rejoin_channels();
    }

    fn rejoin_channels(self: &Arc<Self>) {
        let shared = self.clone();
        tokio::spawn(async move {
            let channels: Vec<String> = shared.channels.lock().await.iter().cloned().collect();
            for channel in channels {
                let result = shared
                    .send_frame(
                        frames::SUBSCRIBE,
                        json!({ "channel": channel }),
                        SendOptions::request(),
                    )
                    .await;
                match result {
                    Ok(_) => debug!("re-joined {channel}"),
                    Err(e) => warn!("failed to re-join {channel}: {e}"),
                }
            }
        });
    }

    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        mut incoming: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = incoming.recv().await {
            match event {
                TransportEvent::Text(text) => self.handle_text(generation, &text).await,
                TransportEvent::Closed { code, reason } => {
                    self.handle_close(generation, code, reason).await;
                    return;
                }
            }
        }
        self.handle_close(generation, close_codes::ABNORMAL, "transport ended".into())
            .await;
    }

    async fn handle_text(&self, generation: u64, text: &str) {
        let inbound = match frame::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                return;
            }
        };

        match inbound {
            Inbound::Pong => {
                *self.missed_heartbeats.lock().await = 0;
            }
            Inbound::Ping => match Frame::pong().encode() {
                Ok(pong) => {
                    let _ = self.transmit_on(generation, &pong).await;
                }
                Err(e) => warn!("failed to encode pong: {e}"),
            },
            Inbound::Response { id, kind, result } => {
                if self.correlator.resolve(id, result.clone()) {
                    return;
                }
                debug!("no request waiting on #{id}, routing {kind} as an event");
                let payload = result.unwrap_or_else(|message| json!({ "error": message }));
                self.events.emit(ClientEvent::Message { kind, payload });
            }
            Inbound::Event { kind, payload } => {
                debug!("socket event: {kind}");
                self.events.emit(ClientEvent::Message { kind, payload });
            }
        }
    }

    /// React to the link of `generation` going away. Stale generations are
    /// ignored.
    async fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        {
            let mut link = self.link.lock().await;
            if link.as_ref().map(|active| active.generation) != Some(generation) {
                return;
            }
            *link = None;
        }

        warn!("socket closed (code {code}): {reason}");
        self.stop_heartbeat().await;
        let rejected = self
            .correlator
            .reject_all(|| TetherError::SocketDisconnected);
        if rejected > 0 {
            debug!("connection loss rejected {rejected} pending request(s)");
        }
        self.set_state(ConnectionState::Disconnected).await;
        self.events.emit(ClientEvent::Disconnected {
            code,
            reason: reason.clone(),
        });

        if code == close_codes::NORMAL || self.manual_close.load(Ordering::SeqCst) {
            info!("socket closed normally, not reconnecting");
            return;
        }
        self.schedule_reconnect().await;
    }

    /// Arm the reconnect timer, or give up when the policy is exhausted.
    async fn schedule_reconnect(self: &Arc<Self>) {
        if self.manual_close.load(Ordering::SeqCst) {
            return;
        }

        let attempts = *self.reconnect_attempts.lock().await;
        if self.policy.is_exhausted(attempts) {
            if !self.gave_up.swap(true, Ordering::SeqCst) {
                error!("giving up after {attempts} reconnection attempt(s)");
                self.events
                    .emit(ClientEvent::ReconnectFailed { attempts });
            }
            self.set_state(ConnectionState::Disconnected).await;
            return;
        }

        let delay = self.policy.delay(attempts);
        let epoch = self.reconnect_epoch.load(Ordering::SeqCst);
        self.set_state(ConnectionState::Reconnecting).await;
        warn!(
            "reconnection attempt {} in {:.1}s",
            attempts + 1,
            delay.as_secs_f64()
        );
        self.events.emit(ClientEvent::ReconnectAttempt {
            attempt: attempts + 1,
            delay,
        });

        let shared = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shared.reconnect_notify.notified() => {
                    debug!("reconnect timer cancelled");
                    return;
                }
            }
            if shared.reconnect_epoch.load(Ordering::SeqCst) != epoch
                || shared.manual_close.load(Ordering::SeqCst)
            {
                debug!("reconnect timer superseded");
                return;
            }

            *shared.reconnect_attempts.lock().await += 1;
            if let Err(e) = Shared::reopen(shared).await {
                debug!("reconnection attempt failed: {e}");
            }
        });

        // Not aborting the previous handle: it may be the task running this.
        *self.reconnect_task.lock().await = Some(handle);
    }

    /// Stop any heartbeat and start a new one for `generation`.
    async fn start_heartbeat(self: &Arc<Self>, generation: u64) {
        self.stop_heartbeat().await;
        *self.missed_heartbeats.lock().await = 0;

        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        if interval.is_zero() {
            return;
        }

        let shared = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;

                let max_missed = shared.config.max_missed_heartbeats;
                let missed = *shared.missed_heartbeats.lock().await;
                if max_missed > 0 && missed >= max_missed {
                    error!("connection appears dead ({missed} unanswered pings)");
                    let _ = shared
                        .send_on(
                            generation,
                            Outgoing::Close {
                                code: close_codes::HEARTBEAT_TIMEOUT,
                                reason: "heartbeat timeout".into(),
                            },
                        )
                        .await;
                    // Runs outside this task, which handle_close aborts.
                    let closer = shared.clone();
                    tokio::spawn(async move {
                        closer
                            .handle_close(
                                generation,
                                close_codes::HEARTBEAT_TIMEOUT,
                                "heartbeat timeout".into(),
                            )
                            .await;
                    });
                    return;
                }

                let ping = match Frame::ping().encode() {
                    Ok(ping) => ping,
                    Err(e) => {
                        warn!("failed to encode ping: {e}");
                        return;
                    }
                };
                if shared.transmit_on(generation, &ping).await.is_err() {
                    return;
                }
                *shared.missed_heartbeats.lock().await += 1;
            }
        });

        *self.heartbeat_task.lock().await = Some(handle);
    }

    async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn send_frame(
        &self,
        kind: &str,
        payload: Value,
        options: SendOptions,
    ) -> TetherResult<Option<Value>> {
        if options.expect_response {
            if *self.state.lock().await != ConnectionState::Connected {
                return Err(TetherError::NotConnected);
            }

            let (id, rx) = self.correlator.register(kind);
            let text = match Frame::new(kind, payload).with_id(id).encode() {
                Ok(text) => text,
                Err(e) => {
                    self.correlator.cancel(id);
                    return Err(e);
                }
            };
            if let Err(e) = self.transmit(&text).await {
                self.correlator.cancel(id);
                return Err(e);
            }

            let timeout = options
                .timeout
                .unwrap_or_else(|| self.config.response_timeout());
            return self.correlator.wait(id, rx, timeout).await.map(Some);
        }

        let text = Frame::new(kind, payload).encode()?;
        let mut queue = self.queue.lock().await;
        if *self.state.lock().await == ConnectionState::Connected {
            self.transmit(&text).await?;
        } else if options.queue_if_disconnected {
            if queue.len() >= self.config.max_queue_size.max(1) {
                warn!("outbound queue full, dropping oldest frame");
                queue.pop_front();
            }
            queue.push_back(text);
            debug!("queued {kind} while disconnected ({} queued)", queue.len());
        } else {
            debug!("dropping {kind} while disconnected");
        }
        Ok(None)
    }

    /// Write a text frame on the current link.
    async fn transmit(&self, text: &str) -> TetherResult<()> {
        let link = self.link.lock().await;
        let active = link.as_ref().ok_or(TetherError::NotConnected)?;
        active
            .outgoing
            .send(Outgoing::Text(text.to_string()))
            .map_err(|_| TetherError::NotConnected)
    }

    /// Write a text frame only if `generation` is still the live link.
    async fn transmit_on(&self, generation: u64, text: &str) -> TetherResult<()> {
        self.send_on(generation, Outgoing::Text(text.to_string()))
            .await
    }

    async fn send_on(&self, generation: u64, outgoing: Outgoing) -> TetherResult<()> {
        let link = self.link.lock().await;
        match link.as_ref() {
            Some(active) if active.generation == generation => active
                .outgoing
                .send(outgoing)
                .map_err(|_| TetherError::NotConnected),
            _ => Err(TetherError::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tether_core::storage::MemoryStore;

    /// Connector that always refuses.
    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _url: &str) -> TetherResult<Link> {
            Err(TetherError::Network("connection refused".into()))
        }
    }

    fn manager() -> SocketManager {
        SocketManager::with_connector(
            SocketConfig::default(),
            "ws://localhost:1/ws",
            EventBus::new(64),
            Arc::new(Refusing),
        )
    }

    #[test]
    fn test_handshake_url_carries_token() {
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()));
        credentials.set(&tether_core::credentials::Credential::new(
            "tok en",
            None,
            chrono::Utc::now(),
        ));
        let manager = manager().with_credentials(credentials);
        assert_eq!(
            manager.shared.handshake_url(),
            "ws://localhost:1/ws?token=tok%20en"
        );
    }

    #[test]
    fn test_handshake_token_escapes_reserved_characters() {
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()));
        credentials.set(&tether_core::credentials::Credential::new(
            "a+b/c==",
            None,
            chrono::Utc::now(),
        ));
        let manager = SocketManager::with_connector(
            SocketConfig::default(),
            "ws://localhost:1/ws?client=cli",
            EventBus::new(64),
            Arc::new(Refusing),
        )
        .with_credentials(credentials);
        assert_eq!(
            manager.shared.handshake_url(),
            "ws://localhost:1/ws?client=cli&token=a%2Bb%2Fc%3D%3D"
        );
    }

    #[test]
    fn test_handshake_url_without_token() {
        assert_eq!(manager().shared.handshake_url(), "ws://localhost:1/ws");
    }

    #[tokio::test]
    async fn test_initial_state() {
        let manager = manager();
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
        assert_eq!(manager.pending_requests(), 0);
        assert_eq!(manager.queued_frames().await, 0);
    }

    #[tokio::test]
    async fn test_correlated_send_requires_connection() {
        let manager = manager();
        let err = manager
            .send("chat", json!({"text": "hi"}), SendOptions::request())
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::NotConnected));
        assert_eq!(manager.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_reserved_types_rejected() {
        let manager = manager();
        let err = manager
            .send("ping", Value::Null, SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_queue_drops_oldest_when_full() {
        let config = SocketConfig {
            max_queue_size: 2,
            ..SocketConfig::default()
        };
        let manager = SocketManager::with_connector(
            config,
            "ws://localhost:1/ws",
            EventBus::new(64),
            Arc::new(Refusing),
        );
        for n in 0..3 {
            manager
                .send("chat", json!({ "n": n }), SendOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(manager.queued_frames().await, 2);

        let queue = manager.shared.queue.lock().await;
        let first: Value = serde_json::from_str(&queue[0]).unwrap();
        assert_eq!(first["payload"]["n"], 1);
    }

    #[tokio::test]
    async fn test_no_queue_option_drops() {
        let manager = manager();
        let reply = manager
            .send("chat", json!({}), SendOptions::default().no_queue())
            .await
            .unwrap();
        assert_eq!(reply, None);
        assert_eq!(manager.queued_frames().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_schedules_reconnect() {
        let manager = manager();
        let mut rx = manager.events().subscribe();

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.state().await, ConnectionState::Reconnecting);

        let mut saw_attempt = false;
        while let Ok(event) = rx.try_recv() {
            if let ClientEvent::ReconnectAttempt { attempt, delay } = event {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_secs(1));
                saw_attempt = true;
            }
        }
        assert!(saw_attempt);

        manager.disconnect().await;
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }
}
