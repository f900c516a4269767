//! HTTP client.
//!
//! Wraps `reqwest::Client` with base URL resolution, default headers, a
//! per-request timeout and the interceptor pipeline. The client performs at
//! most one automatic retry, and only when a response interceptor asks for
//! it (the 401 refresh cycle).

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use tether_core::config::HttpConfig;
use tether_core::constants;
use tether_core::credentials::CredentialStore;
use tether_core::error::{TetherError, TetherResult};
use tether_core::events::EventBus;

use crate::endpoints::{endpoint_path, EndpointPolicy};
use crate::interceptor::{
    AuthInterceptor, ErrorInterceptor, RequestInterceptor, ResponseAction, ResponseInterceptor,
    TimingInterceptor,
};
use crate::refresh::RefreshCoordinator;
use crate::request::{build_form, RequestBody, RequestConfig, RequestContext, UploadPart};
use crate::response::HttpResponse;

/// HTTP client with auth, timing and error handling built in.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    base_url: String,
    timeout: Duration,
    default_headers: Vec<(String, String)>,
    retryable_statuses: Vec<u16>,
    policy: Arc<EndpointPolicy>,
    credentials: CredentialStore,
    refresh: Arc<RefreshCoordinator>,
    events: EventBus,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

impl HttpClient {
    /// Build a client with the default interceptor pipeline.
    pub fn new(
        config: &HttpConfig,
        credentials: CredentialStore,
        events: EventBus,
    ) -> TetherResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30));

        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let inner = builder
            .build()
            .map_err(|e| TetherError::Network(format!("failed to build HTTP client: {e}")))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let policy = Arc::new(EndpointPolicy::from_config(config)?);

        let mut default_headers = vec![(
            config.client_version_header.clone(),
            constants::CLIENT_VERSION.to_string(),
        )];
        for (k, v) in &config.custom_headers {
            default_headers.push((k.clone(), v.clone()));
        }

        let refresh = Arc::new(
            RefreshCoordinator::new(
                inner.clone(),
                join_url(&base_url, &config.refresh_path),
                config.refresh_timeout(),
                credentials.clone(),
            )
            .with_version_header(config.client_version_header.clone())
            .with_events(events.clone()),
        );

        let timing = Arc::new(TimingInterceptor);
        let request_interceptors: Vec<Arc<dyn RequestInterceptor>> = vec![
            Arc::new(AuthInterceptor::new(refresh.clone())),
            timing.clone(),
        ];
        let response_interceptors: Vec<Arc<dyn ResponseInterceptor>> = vec![
            timing,
            Arc::new(ErrorInterceptor::new(refresh.clone(), policy.clone())),
        ];

        debug!("http client ready (base_url={base_url:?})");

        Ok(Self {
            inner,
            base_url,
            timeout: config.timeout(),
            default_headers,
            retryable_statuses: config.retryable_statuses.clone(),
            policy,
            credentials,
            refresh,
            events,
            request_interceptors,
            response_interceptors,
        })
    }

    /// Append a request interceptor after the defaults.
    pub fn add_request_interceptor(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        debug!("request interceptor added: {}", interceptor.name());
        self.request_interceptors.push(interceptor);
    }

    /// Append a response interceptor after the defaults.
    pub fn add_response_interceptor(&mut self, interceptor: Arc<dyn ResponseInterceptor>) {
        debug!("response interceptor added: {}", interceptor.name());
        self.response_interceptors.push(interceptor);
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn refresh_coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether a caller-side retry policy may retry `err`.
    pub fn is_retryable(&self, err: &TetherError) -> bool {
        err.is_retryable(&self.retryable_statuses)
    }

    /// Resolve `url` against the base URL. Absolute URLs pass through.
    pub fn resolve_url(&self, url: &str) -> TetherResult<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        if self.base_url.is_empty() {
            return Err(TetherError::MissingConfig(format!(
                "http.base_url (needed to resolve {url:?})"
            )));
        }
        Ok(join_url(&self.base_url, url))
    }

    /// Issue a request through the interceptor pipeline.
    pub async fn request(&self, config: RequestConfig) -> TetherResult<HttpResponse> {
        let url = self.resolve_url(&config.url)?;
        let path = endpoint_path(&self.base_url, &url);
        let is_public = config
            .public
            .unwrap_or_else(|| self.policy.is_public(&config.method, &path));

        let mut attempt = 0;
        loop {
            let mut ctx =
                RequestContext::new(config.method.clone(), url.clone(), path.clone(), is_public, attempt);
            ctx.headers = self.default_headers.clone();
            for (k, v) in &config.headers {
                ctx.set_header(k, v.clone());
            }
            if matches!(config.body, RequestBody::Multipart(_)) {
                ctx.remove_header("content-type");
            }

            for interceptor in &self.request_interceptors {
                interceptor.on_request(&mut ctx).await?;
            }

            let result = self.dispatch(&ctx, &config).await;

            match self.run_response_interceptors(&ctx, result).await {
                ResponseAction::Next(result) | ResponseAction::Done(result) => return result,
                ResponseAction::Retry if attempt == 0 => {
                    debug!("retrying {} after credential refresh", ctx.label());
                    attempt += 1;
                }
                ResponseAction::Retry => {
                    warn!("{} asked for a second retry, refusing", ctx.label());
                    return Err(TetherError::Internal(format!(
                        "{} exceeded its single retry",
                        ctx.label()
                    )));
                }
            }
        }
    }

    async fn run_response_interceptors(
        &self,
        ctx: &RequestContext,
        mut result: TetherResult<HttpResponse>,
    ) -> ResponseAction {
        for interceptor in &self.response_interceptors {
            match interceptor.on_response(ctx, result).await {
                ResponseAction::Next(next) => result = next,
                other => return other,
            }
        }
        ResponseAction::Next(result)
    }

    /// Send one attempt. Never converts status codes into errors.
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        config: &RequestConfig,
    ) -> TetherResult<HttpResponse> {
        let timeout = config.timeout.unwrap_or(self.timeout);

        let mut builder = self.inner.request(ctx.method.clone(), &ctx.url);
        for (key, value) in &ctx.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder = match &config.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let started = Instant::now();
        let exchange = async {
            let response = builder.send().await.map_err(classify_error)?;
            HttpResponse::read(response, config.response_kind, config.progress.as_ref(), started)
                .await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TetherError::timeout(ctx.label(), started.elapsed())),
        }
    }

    // --- Convenience methods ---

    pub async fn get(&self, url: &str) -> TetherResult<HttpResponse> {
        self.request(RequestConfig::new(Method::GET, url)).await
    }

    pub async fn post(&self, url: &str, body: serde_json::Value) -> TetherResult<HttpResponse> {
        self.request(RequestConfig::new(Method::POST, url).json(body)).await
    }

    pub async fn put(&self, url: &str, body: serde_json::Value) -> TetherResult<HttpResponse> {
        self.request(RequestConfig::new(Method::PUT, url).json(body)).await
    }

    pub async fn patch(&self, url: &str, body: serde_json::Value) -> TetherResult<HttpResponse> {
        self.request(RequestConfig::new(Method::PATCH, url).json(body)).await
    }

    pub async fn delete(&self, url: &str) -> TetherResult<HttpResponse> {
        self.request(RequestConfig::new(Method::DELETE, url)).await
    }

    /// GET and deserialize the body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> TetherResult<T> {
        self.get(url).await?.json()
    }

    /// POST a JSON body and deserialize the response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> TetherResult<T> {
        self.post(url, body).await?.json()
    }

    /// POST a multipart form. The form is rebuilt from `parts` if the
    /// request is retried.
    pub async fn upload(&self, url: &str, parts: Vec<UploadPart>) -> TetherResult<HttpResponse> {
        self.request(RequestConfig::new(Method::POST, url).multipart(parts))
            .await
    }

    /// GET the raw body bytes.
    pub async fn download(&self, url: &str) -> TetherResult<Vec<u8>> {
        let response = self.request(RequestConfig::new(Method::GET, url).binary()).await?;
        Ok(response.into_bytes())
    }

    /// GET the raw body bytes, reporting `(downloaded, total)` per chunk.
    ///
    /// `total` is 0 when the server sends no `Content-Length`.
    pub async fn download_with_progress<F>(&self, url: &str, progress: F) -> TetherResult<Vec<u8>>
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        let config = RequestConfig::new(Method::GET, url)
            .binary()
            .on_progress(progress);
        Ok(self.request(config).await?.into_bytes())
    }
}

/// Join a base URL and a path with exactly one slash between them.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Classify a reqwest error into a TetherError variant.
fn classify_error(e: reqwest::Error) -> TetherError {
    if e.is_connect() {
        TetherError::Network(format!("connection failed: {e}"))
    } else {
        TetherError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::storage::MemoryStore;

    fn client(base_url: &str) -> HttpClient {
        let config = HttpConfig {
            base_url: base_url.into(),
            ..Default::default()
        };
        HttpClient::new(
            &config,
            CredentialStore::new(Arc::new(MemoryStore::new())),
            EventBus::new(16),
        )
        .unwrap()
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.io", "/users"), "https://a.io/users");
        assert_eq!(join_url("https://a.io/", "users"), "https://a.io/users");
        assert_eq!(join_url("https://a.io/v1", ""), "https://a.io/v1");
    }

    #[test]
    fn test_resolve_url() {
        let client = client("https://api.example.com/v1/");
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(
            client.resolve_url("/users").unwrap(),
            "https://api.example.com/v1/users"
        );
        assert_eq!(
            client.resolve_url("https://other.example.com/x").unwrap(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_relative_url_without_base_is_missing_config() {
        let client = client("");
        assert!(matches!(
            client.resolve_url("/users"),
            Err(TetherError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_refresh_url_joins_base() {
        let client = client("https://api.example.com/");
        assert_eq!(
            client.refresh_coordinator().refresh_url(),
            "https://api.example.com/auth/refresh-token"
        );
    }

    #[test]
    fn test_is_retryable_uses_configured_statuses() {
        let client = client("https://api.example.com");
        assert!(client.is_retryable(&TetherError::Http { status: 503, body: String::new() }));
        assert!(!client.is_retryable(&TetherError::Http { status: 400, body: String::new() }));
        assert!(client.is_retryable(&TetherError::Network("reset".into())));
        assert!(!client.is_retryable(&TetherError::Auth("expired".into())));
    }
}
