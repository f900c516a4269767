//! Socket frame envelope.
//!
//! Every frame is a JSON object `{ type, payload, id?, timestamp, error? }`.
//! Client requests carry an `id`; the server echoes it on the reply, with
//! either a `payload` or an `error`. Server pushes usually carry no `id`; a
//! frame whose `id` matches no pending request is routed as a push.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_core::constants::frames;
use tether_core::error::{TetherError, TetherResult};

/// Wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Frame {
    /// New outbound frame stamped with the current time.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            id: None,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            error: None,
        }
    }

    pub fn ping() -> Self {
        Self::new(frames::PING, Value::Null)
    }

    pub fn pong() -> Self {
        Self::new(frames::PONG, Value::Null)
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn encode(&self) -> TetherResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Heartbeat reply.
    Pong,
    /// Server-initiated heartbeat; answered with a pong.
    Ping,
    /// Frame carrying an `id`; a reply if a request is waiting on it.
    Response {
        id: u64,
        kind: String,
        result: Result<Value, String>,
    },
    /// Server push, routed by type.
    Event { kind: String, payload: Value },
}

/// Decode a text frame. Anything that is not a well-formed envelope is a
/// `Protocol` error.
pub fn decode(text: &str) -> TetherResult<Inbound> {
    let frame: Frame = serde_json::from_str(text)
        .map_err(|e| TetherError::Protocol(format!("invalid frame: {e}")))?;

    if frame.kind.trim().is_empty() {
        return Err(TetherError::Protocol("frame has an empty type".into()));
    }

    match (frame.kind.as_str(), frame.id) {
        (frames::PONG, _) => Ok(Inbound::Pong),
        (frames::PING, None) => Ok(Inbound::Ping),
        (_, Some(id)) => {
            let result = match frame.error {
                Some(error) if !error.is_null() => Err(error_message(&error)),
                _ => Ok(frame.payload),
            };
            Ok(Inbound::Response {
                id,
                kind: frame.kind,
                result,
            })
        }
        (_, None) => Ok(Inbound::Event {
            kind: frame.kind,
            payload: frame.payload,
        }),
    }
}

/// Types the manager sends on its own behalf.
pub fn is_reserved(kind: &str) -> bool {
    frames::RESERVED.contains(&kind)
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_omits_empty_fields() {
        let text = Frame::ping().encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "ping");
        assert!(value.get("payload").is_none());
        assert!(value.get("id").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_decode_event() {
        let inbound = decode(r#"{"type":"chat","payload":{"text":"hi"}}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Event {
                kind: "chat".into(),
                payload: json!({"text": "hi"})
            }
        );
    }

    #[test]
    fn test_decode_responses() {
        assert_eq!(
            decode(r#"{"type":"chat","id":4,"payload":{"ok":true}}"#).unwrap(),
            Inbound::Response {
                id: 4,
                kind: "chat".into(),
                result: Ok(json!({"ok": true}))
            }
        );
        assert_eq!(
            decode(r#"{"type":"subscribe","id":5,"error":{"message":"forbidden"}}"#).unwrap(),
            Inbound::Response {
                id: 5,
                kind: "subscribe".into(),
                result: Err("forbidden".into())
            }
        );
        assert_eq!(
            decode(r#"{"type":"x","id":6,"error":"boom"}"#).unwrap(),
            Inbound::Response {
                id: 6,
                kind: "x".into(),
                result: Err("boom".into())
            }
        );
    }

    #[test]
    fn test_decode_heartbeats() {
        assert_eq!(decode(r#"{"type":"pong"}"#).unwrap(), Inbound::Pong);
        assert_eq!(decode(r#"{"type":"pong","id":3}"#).unwrap(), Inbound::Pong);
        assert_eq!(decode(r#"{"type":"ping"}"#).unwrap(), Inbound::Ping);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"payload":{}}"#).is_err());
        assert!(decode(r#"{"type":""}"#).is_err());
        assert!(decode(r#"{"type":"x","id":"seven"}"#).is_err());
        assert!(decode(r#"[1,2]"#).is_err());
    }

    #[test]
    fn test_reserved_types() {
        assert!(is_reserved("ping"));
        assert!(is_reserved("subscribe"));
        assert!(!is_reserved("chat"));
    }
}
