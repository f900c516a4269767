//! Response types.
//!
//! The transport never turns a failing status into an error; it hands back an
//! `HttpResponse` and the error interceptor decides.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use serde::de::DeserializeOwned;

use tether_core::error::{TetherError, TetherResult};

use crate::request::{ProgressFn, ResponseKind};

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// `Content-Type` said JSON and the body parsed.
    Json(serde_json::Value),
    /// Anything else, decoded lossily as UTF-8.
    Text(String),
    /// Raw bytes, for downloads.
    Binary(Vec<u8>),
}

impl ResponseBody {
    /// Body rendered as text. JSON is re-serialized compactly.
    pub fn to_text(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// A received HTTP response, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    /// Time from dispatch until the body was fully read.
    pub elapsed: Duration,
}

impl HttpResponse {
    /// A response produced locally, e.g. by an interceptor answering from
    /// cache.
    pub fn synthetic(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            elapsed: Duration::ZERO,
        }
    }

    /// Read a reqwest response to completion.
    pub(crate) async fn read(
        response: reqwest::Response,
        kind: ResponseKind,
        progress: Option<&ProgressFn>,
        started: Instant,
    ) -> TetherResult<Self> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let body = match kind {
            ResponseKind::Binary => ResponseBody::Binary(read_chunks(response, progress).await?),
            ResponseKind::Auto => {
                let is_json = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|ct| ct.to_ascii_lowercase().contains("json"))
                    .unwrap_or(false);
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| TetherError::Network(format!("failed to read response body: {e}")))?;
                decode_body(&bytes, is_json)
            }
        };

        Ok(Self {
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }

    /// Status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body. Text bodies are parsed as JSON too.
    pub fn json<T: DeserializeOwned>(&self) -> TetherResult<T> {
        let result = match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone()),
            ResponseBody::Text(text) => serde_json::from_str(text),
            ResponseBody::Binary(bytes) => serde_json::from_slice(bytes),
        };
        result.map_err(|e| TetherError::Serialization(format!("failed to parse response: {e}")))
    }

    pub fn text(&self) -> String {
        self.body.to_text()
    }

    /// Raw body bytes.
    pub fn bytes(&self) -> Vec<u8> {
        match &self.body {
            ResponseBody::Binary(bytes) => bytes.clone(),
            other => other.to_text().into_bytes(),
        }
    }

    /// Consume into raw bytes without copying binary bodies.
    pub fn into_bytes(self) -> Vec<u8> {
        match self.body {
            ResponseBody::Binary(bytes) => bytes,
            ResponseBody::Text(text) => text.into_bytes(),
            ResponseBody::Json(value) => value.to_string().into_bytes(),
        }
    }

    /// Header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Convert a failing response into `TetherError::Http`.
    pub fn into_error(self) -> TetherError {
        TetherError::Http {
            status: self.status,
            body: self.body.to_text(),
        }
    }
}

fn decode_body(bytes: &[u8], is_json: bool) -> ResponseBody {
    if is_json && !bytes.is_empty() {
        if let Ok(value) = serde_json::from_slice(bytes) {
            return ResponseBody::Json(value);
        }
    }
    ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned())
}

/// Stream the body chunk by chunk, reporting `(downloaded, total)`.
///
/// `total` is 0 when the server sends no `Content-Length`.
async fn read_chunks(
    mut response: reqwest::Response,
    progress: Option<&ProgressFn>,
) -> TetherResult<Vec<u8>> {
    let total = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut bytes = Vec::with_capacity(if total > 0 { total as usize } else { 8192 });

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| TetherError::Network(format!("download stream error: {e}")))?
    {
        downloaded += chunk.len() as u64;
        bytes.extend_from_slice(&chunk);
        if let Some(progress) = progress {
            progress(downloaded, total);
        }
    }

    Ok(bytes)
}
