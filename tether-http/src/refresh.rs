//! Single-flight access token refresh.
//!
//! However many callers discover an expired token at once, exactly one
//! `POST {base}{refresh_path}` is issued. Callers arriving while it is in
//! flight queue a oneshot and are settled in arrival order with the leader's
//! outcome.
//!
//! A rejected refresh ends the session: the leader clears the credential
//! store and broadcasts `auth:logout` once, however many callers were waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use tether_core::constants;
use tether_core::credentials::CredentialStore;
use tether_core::error::{TetherError, TetherResult};
use tether_core::events::{ClientEvent, EventBus};

type Waiter = oneshot::Sender<Result<String, String>>;

enum Role {
    Leader(String),
    Waiter(oneshot::Receiver<Result<String, String>>),
}

/// Why a refresh produced no token.
enum RefreshFailure {
    /// Nothing to refresh with; no network call was made.
    NoRefreshToken,
    /// The refresh ran (here or in the leader) and failed. The session has
    /// already been expired.
    Failed(String),
}

impl RefreshFailure {
    fn into_error(self) -> TetherError {
        match self {
            Self::NoRefreshToken => TetherError::Auth(NO_REFRESH_TOKEN.into()),
            Self::Failed(message) => TetherError::Auth(message),
        }
    }
}

const NO_REFRESH_TOKEN: &str = "no refresh token available";

/// Body returned by the refresh endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<Expiry>,
    /// Lifetime in seconds, used when `expiresAt` is absent.
    #[serde(default)]
    expires_in: Option<i64>,
}

/// `expiresAt` as epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expiry {
    Millis(i64),
    Text(String),
}

impl RefreshResponse {
    fn expiry(&self) -> TetherResult<DateTime<Utc>> {
        match &self.expires_at {
            Some(Expiry::Millis(ms)) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| TetherError::Auth(format!("invalid expiresAt {ms}"))),
            Some(Expiry::Text(text)) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| TetherError::Auth(format!("invalid expiresAt {text:?}: {e}"))),
            None => match self.expires_in {
                Some(secs) => Ok(Utc::now() + chrono::Duration::seconds(secs)),
                None => Err(TetherError::Auth("refresh response carried no expiry".into())),
            },
        }
    }
}

/// Coordinates token refreshes for one credential store.
pub struct RefreshCoordinator {
    http: reqwest::Client,
    refresh_url: String,
    timeout: Duration,
    version_header: String,
    credentials: CredentialStore,
    events: Option<EventBus>,
    /// `Some` while a refresh is in flight; holds the queued waiters.
    pending: Mutex<Option<Vec<Waiter>>>,
    refresh_count: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        http: reqwest::Client,
        refresh_url: impl Into<String>,
        timeout: Duration,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            http,
            refresh_url: refresh_url.into(),
            timeout,
            version_header: constants::CLIENT_VERSION_HEADER.to_string(),
            credentials,
            events: None,
            pending: Mutex::new(None),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Override the header carrying the client version on refresh calls.
    pub fn with_version_header(mut self, header: impl Into<String>) -> Self {
        self.version_header = header.into();
        self
    }

    /// Broadcast `auth:logout` on `events` when the session expires.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }

    /// A usable access token, refreshing first if the stored one expired.
    ///
    /// `None` when there is no credential or the refresh failed; a failed
    /// refresh has already expired the session.
    pub async fn ensure_fresh_token(&self) -> Option<String> {
        let credential = self.credentials.get();
        if let Some(token) = credential.access_token.as_ref() {
            if !credential.is_expired_at(Utc::now()) {
                return Some(token.clone());
            }
        }

        match self.refresh().await {
            Ok(token) => Some(token),
            Err(e) => {
                debug!("no fresh token available: {e}");
                None
            }
        }
    }

    /// Refresh after the server rejected `rejected_token`.
    ///
    /// If another caller already replaced that token with a live one, the new
    /// token is returned without another network call. A rejection with no
    /// refresh token to fall back on also expires the session.
    pub async fn refresh_rejected(&self, rejected_token: Option<&str>) -> TetherResult<String> {
        let credential = self.credentials.get();
        if let Some(current) = credential.access_token.as_deref() {
            if Some(current) != rejected_token && !credential.is_expired_at(Utc::now()) {
                debug!("token already replaced by a concurrent refresh");
                return Ok(current.to_string());
            }
        }
        match self.run_refresh().await {
            Ok(token) => Ok(token),
            Err(RefreshFailure::NoRefreshToken) => {
                self.expire_session(NO_REFRESH_TOKEN);
                Err(TetherError::Auth(NO_REFRESH_TOKEN.into()))
            }
            Err(failure) => Err(failure.into_error()),
        }
    }

    /// Force a refresh, joining one already in flight.
    pub async fn refresh(&self) -> TetherResult<String> {
        self.run_refresh().await.map_err(RefreshFailure::into_error)
    }

    /// Clear the credential store and broadcast `auth:logout`.
    pub fn expire_session(&self, reason: &str) {
        warn!("session expired: {reason}");
        self.credentials.clear();
        if let Some(events) = &self.events {
            events.emit(ClientEvent::SessionExpired {
                reason: reason.to_string(),
            });
        }
    }

    async fn run_refresh(&self) -> Result<String, RefreshFailure> {
        let role = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| RefreshFailure::Failed("refresh state poisoned".into()))?;

            match pending.as_mut() {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!("joining in-flight refresh ({} waiting)", waiters.len());
                    Role::Waiter(rx)
                }
                None => {
                    let Some(refresh_token) = self.credentials.refresh_token() else {
                        return Err(RefreshFailure::NoRefreshToken);
                    };
                    *pending = Some(Vec::new());
                    Role::Leader(refresh_token)
                }
            }
        };

        let refresh_token = match role {
            Role::Leader(refresh_token) => refresh_token,
            Role::Waiter(rx) => {
                return match rx.await {
                    Ok(Ok(token)) => Ok(token),
                    Ok(Err(message)) => Err(RefreshFailure::Failed(message)),
                    Err(_) => Err(RefreshFailure::Failed("refresh abandoned".into())),
                };
            }
        };

        // Settles waiters even if this future is dropped mid-flight.
        let mut guard = SettleGuard {
            coordinator: self,
            outcome: None,
        };

        let outcome = match self.perform_refresh(&refresh_token).await {
            Ok(token) => Ok(token),
            Err(e) => {
                warn!("token refresh failed: {e}");
                let message = match e {
                    TetherError::Auth(message) => message,
                    other => other.to_string(),
                };
                self.expire_session(&message);
                Err(message)
            }
        };
        guard.outcome = Some(outcome.clone());
        drop(guard);

        outcome.map_err(RefreshFailure::Failed)
    }

    /// Number of refresh calls issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Whether a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    async fn perform_refresh(&self, refresh_token: &str) -> TetherResult<String> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        debug!("refreshing access token via {}", self.refresh_url);

        let request = self
            .http
            .post(&self.refresh_url)
            .header(self.version_header.as_str(), constants::CLIENT_VERSION)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => return Err(TetherError::timeout("token refresh", started.elapsed())),
            Ok(Err(e)) => return Err(TetherError::Network(format!("refresh request failed: {e}"))),
            Ok(Ok(response)) => response,
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TetherError::Auth(format!(
                "refresh rejected with status {status}: {body}"
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| TetherError::Auth(format!("invalid refresh response: {e}")))?;
        let expires_at = body.expiry()?;

        self.credentials
            .update_tokens(&body.access_token, body.refresh_token.as_deref(), expires_at);
        info!(
            "access token refreshed in {}ms (expires {expires_at})",
            started.elapsed().as_millis()
        );
        Ok(body.access_token)
    }
}

/// Clears the pending slot and settles queued waiters in arrival order.
struct SettleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    outcome: Option<Result<String, String>>,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        let waiters = match self.coordinator.pending.lock() {
            Ok(mut pending) => pending.take().unwrap_or_default(),
            Err(_) => return,
        };
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err("refresh abandoned".to_string()));

        if !waiters.is_empty() {
            debug!("settling {} refresh waiter(s)", waiters.len());
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}
