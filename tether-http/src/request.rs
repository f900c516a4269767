//! Request description and the mutable context interceptors work on.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::multipart::{Form, Part};
use reqwest::Method;

use tether_core::error::{TetherError, TetherResult};

/// Download progress callback receiving `(bytes_downloaded, total_bytes)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// How to decode the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
    /// JSON when `Content-Type` says so, text otherwise.
    #[default]
    Auto,
    /// Raw bytes.
    Binary,
}

/// One field of a multipart upload.
#[derive(Debug, Clone)]
pub enum UploadPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        data: Vec<u8>,
    },
}

impl UploadPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: None,
            data,
        }
    }

    /// Set the MIME type of a file part. No effect on text parts.
    pub fn with_mime(mut self, mime_type: impl Into<String>) -> Self {
        if let Self::File { mime, .. } = &mut self {
            *mime = Some(mime_type.into());
        }
        self
    }
}

/// Request body.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// Multipart form. Kept as parts so the form can be rebuilt on retry.
    Multipart(Vec<UploadPart>),
}

/// Build a fresh multipart form from parts.
pub(crate) fn build_form(parts: &[UploadPart]) -> TetherResult<Form> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            UploadPart::Text { name, value } => form.text(name.clone(), value.clone()),
            UploadPart::File {
                name,
                file_name,
                mime,
                data,
            } => {
                let mut file = Part::bytes(data.clone()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    file = file.mime_str(mime).map_err(|e| {
                        TetherError::Internal(format!("invalid mime type {mime:?}: {e}"))
                    })?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Everything needed to issue one request.
#[derive(Clone)]
pub struct RequestConfig {
    pub method: Method,
    /// Absolute URL, or a path joined onto the configured base URL.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
    /// Forces the endpoint public (`Some(true)`) or private (`Some(false)`),
    /// bypassing the endpoint policy.
    pub public: Option<bool>,
    pub response_kind: ResponseKind,
    pub progress: Option<ProgressFn>,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
            public: None,
            response_kind: ResponseKind::Auto,
            progress: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, parts: Vec<UploadPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = Some(public);
        self
    }

    pub fn binary(mut self) -> Self {
        self.response_kind = ResponseKind::Binary;
        self
    }

    pub fn on_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("public", &self.public)
            .field("response_kind", &self.response_kind)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Per-attempt request state handed to interceptors.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Fully resolved URL.
    pub url: String,
    /// Endpoint path relative to the base URL, without query.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub is_public: bool,
    /// 0 for the first dispatch, 1 for the single retry.
    pub attempt: u32,
    pub request_id: Option<String>,
    pub started_at: Option<Instant>,
    /// Token the auth interceptor attached, if any.
    pub bearer_token: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, url: String, path: String, is_public: bool, attempt: u32) -> Self {
        Self {
            method,
            url,
            path,
            headers: Vec::new(),
            is_public,
            attempt,
            request_id: None,
            started_at: None,
            bearer_token: None,
        }
    }

    /// Set a header, replacing any existing value (names are case-insensitive).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `"GET /users"`, for logs and timeout errors.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}
