//! CLI command implementations.

pub mod auth;
pub mod config;
pub mod download;
pub mod listen;
pub mod request;
pub mod send;
pub mod status;

use std::sync::Arc;

use serde_json::{json, Value};

use tether_core::config::ConfigHandle;
use tether_core::credentials::CredentialStore;
use tether_core::error::TetherResult;
use tether_core::events::{ClientEvent, EventBus};
use tether_core::storage::{FileStore, KeyValueStore};
use tether_http::HttpClient;
use tether_socket::SocketManager;

/// Event bus capacity for one CLI run.
const EVENT_CAPACITY: usize = 256;

/// Open the durable key-value store from config.
pub async fn open_store(config: &ConfigHandle) -> TetherResult<Arc<dyn KeyValueStore>> {
    let path = config.read().await.effective_storage_path()?;
    Ok(Arc::new(FileStore::open(path)))
}

/// Credential store backed by the durable store.
pub async fn open_credentials(config: &ConfigHandle) -> TetherResult<CredentialStore> {
    Ok(CredentialStore::new(open_store(config).await?))
}

/// HTTP client from config with the default pipeline.
pub async fn create_http_client(
    config: &ConfigHandle,
    credentials: CredentialStore,
    events: EventBus,
) -> TetherResult<HttpClient> {
    let http_config = config.read().await.http.clone();
    HttpClient::new(&http_config, credentials, events)
}

/// Socket manager from config, authenticating the handshake with `credentials`.
pub async fn create_socket_manager(
    config: &ConfigHandle,
    credentials: CredentialStore,
    events: EventBus,
) -> TetherResult<SocketManager> {
    let cfg = config.read().await;
    let url = cfg.socket_url()?;
    Ok(SocketManager::new(cfg.socket.clone(), url, events).with_credentials(credentials))
}

pub fn new_event_bus() -> EventBus {
    EventBus::new(EVENT_CAPACITY)
}

/// JSON rendering of a client event, for `--format json`.
pub fn event_to_json(event: &ClientEvent) -> Value {
    match event {
        ClientEvent::StateChanged { from, to } => {
            json!({ "event": event.name(), "from": from, "to": to })
        }
        ClientEvent::Connected => json!({ "event": event.name() }),
        ClientEvent::Disconnected { code, reason } => {
            json!({ "event": event.name(), "code": code, "reason": reason })
        }
        ClientEvent::ReconnectAttempt { attempt, delay } => json!({
            "event": event.name(),
            "attempt": attempt,
            "delay_ms": delay.as_millis() as u64,
        }),
        ClientEvent::ReconnectFailed { attempts } => {
            json!({ "event": event.name(), "attempts": attempts })
        }
        ClientEvent::SessionExpired { reason } => json!({ "event": event.name(), "reason": reason }),
        ClientEvent::Message { kind, payload } => {
            json!({ "event": "message", "type": kind, "payload": payload })
        }
        ClientEvent::Error { message } => json!({ "event": event.name(), "message": message }),
    }
}

/// One-line human rendering of a client event.
pub fn event_to_text(event: &ClientEvent) -> String {
    match event {
        ClientEvent::StateChanged { from, to } => format!("state: {from} -> {to}"),
        ClientEvent::Connected => "connected".to_string(),
        ClientEvent::Disconnected { code, reason } => {
            format!("disconnected (code {code}) {reason}")
        }
        ClientEvent::ReconnectAttempt { attempt, delay } => {
            format!("reconnect attempt {attempt} in {:.1}s", delay.as_secs_f64())
        }
        ClientEvent::ReconnectFailed { attempts } => {
            format!("gave up reconnecting after {attempts} attempt(s)")
        }
        ClientEvent::SessionExpired { reason } => format!("session expired: {reason}"),
        ClientEvent::Message { kind, payload } => format!("[{kind}] {payload}"),
        ClientEvent::Error { message } => format!("error: {message}"),
    }
}

/// Parse an optional JSON argument; absent means `null`.
pub fn parse_json_arg(raw: Option<&str>) -> TetherResult<Value> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(Value::Null),
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// First and last few characters of a secret.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "*****");
        assert_eq!(mask_token("abcdefghijklmnop"), "abcd...mnop");
    }

    #[test]
    fn test_event_rendering() {
        let event = ClientEvent::ReconnectAttempt {
            attempt: 2,
            delay: Duration::from_millis(2000),
        };
        assert_eq!(event_to_text(&event), "reconnect attempt 2 in 2.0s");
        assert_eq!(
            event_to_json(&event),
            json!({"event": "reconnect_attempt", "attempt": 2, "delay_ms": 2000})
        );

        let push = ClientEvent::Message {
            kind: "chat".into(),
            payload: json!({"text": "hi"}),
        };
        assert_eq!(event_to_json(&push)["type"], "chat");
        assert_eq!(event_to_text(&push), r#"[chat] {"text":"hi"}"#);
    }

    #[test]
    fn test_parse_json_arg() {
        assert_eq!(parse_json_arg(None).unwrap(), Value::Null);
        assert_eq!(parse_json_arg(Some(r#"{"a":1}"#)).unwrap()["a"], 1);
        assert!(parse_json_arg(Some("{oops")).is_err());
    }
}
