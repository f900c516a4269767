//! Request/response interceptor pipeline.
//!
//! Request interceptors run before dispatch in registration order and may
//! mutate the `RequestContext` or abort with an error. Response interceptors
//! run after receipt in registration order; each returns a `ResponseAction`
//! deciding whether the pipeline continues, stops, or re-issues the request.
//!
//! The default pipeline is `AuthInterceptor`, `TimingInterceptor` on the
//! request side and `TimingInterceptor`, `ErrorInterceptor` on the response
//! side.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_core::constants;
use tether_core::error::TetherResult;

use crate::endpoints::EndpointPolicy;
use crate::refresh::RefreshCoordinator;
use crate::request::RequestContext;
use crate::response::HttpResponse;

/// What the pipeline does after a response interceptor ran.
#[derive(Debug)]
pub enum ResponseAction {
    /// Hand the (possibly replaced) result to the next interceptor.
    Next(TetherResult<HttpResponse>),
    /// Skip the remaining interceptors and return this result.
    Done(TetherResult<HttpResponse>),
    /// Re-issue the request once, from the request interceptors on.
    Retry,
}

/// Runs before a request is dispatched.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn on_request(&self, ctx: &mut RequestContext) -> TetherResult<()>;
}

/// Runs after a response (or transport failure) is received.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn on_response(
        &self,
        ctx: &RequestContext,
        result: TetherResult<HttpResponse>,
    ) -> ResponseAction;
}

/// Attaches `Authorization: Bearer <token>` to private requests, refreshing
/// an expired token first. Without a usable token the request goes out
/// unauthenticated; if that is because the refresh was rejected, the
/// coordinator has already broadcast `auth:logout`.
pub struct AuthInterceptor {
    refresh: Arc<RefreshCoordinator>,
}

impl AuthInterceptor {
    pub fn new(refresh: Arc<RefreshCoordinator>) -> Self {
        Self { refresh }
    }
}

#[async_trait]
impl RequestInterceptor for AuthInterceptor {
    fn name(&self) -> &str {
        "auth"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> TetherResult<()> {
        if ctx.is_public {
            ctx.remove_header("authorization");
            return Ok(());
        }

        match self.refresh.ensure_fresh_token().await {
            Some(token) => {
                ctx.set_header("Authorization", format!("Bearer {token}"));
                ctx.bearer_token = Some(token);
            }
            None => debug!("no usable credential for {}, sending unauthenticated", ctx.label()),
        }
        Ok(())
    }
}

/// Stamps a request id and start time; logs method, url, status and
/// duration on the way back. Never changes control flow.
#[derive(Default)]
pub struct TimingInterceptor;

#[async_trait]
impl RequestInterceptor for TimingInterceptor {
    fn name(&self) -> &str {
        "timing"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> TetherResult<()> {
        let request_id = Uuid::new_v4().to_string();
        ctx.set_header(constants::REQUEST_ID_HEADER, request_id.clone());
        ctx.request_id = Some(request_id);
        ctx.started_at = Some(Instant::now());
        debug!("{} {} (attempt {})", ctx.method, ctx.url, ctx.attempt + 1);
        Ok(())
    }
}

#[async_trait]
impl ResponseInterceptor for TimingInterceptor {
    fn name(&self) -> &str {
        "timing"
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        result: TetherResult<HttpResponse>,
    ) -> ResponseAction {
        let elapsed_ms = ctx.started_at.map(|t| t.elapsed().as_millis()).unwrap_or(0);
        let request_id = ctx.request_id.as_deref().unwrap_or("-");
        match &result {
            Ok(response) => info!(
                "{} {} -> {} in {elapsed_ms}ms [{request_id}]",
                ctx.method, ctx.url, response.status
            ),
            Err(e) => warn!(
                "{} {} failed after {elapsed_ms}ms [{request_id}]: {e}",
                ctx.method, ctx.url
            ),
        }
        ResponseAction::Next(result)
    }
}

/// Turns failing statuses into errors and owns the one 401 retry.
///
/// On a 401 from a private, non-auth endpoint the first time round, it asks
/// the refresh coordinator for a new token and requests a retry. If the
/// refresh fails the coordinator expires the session (credentials cleared,
/// `auth:logout` broadcast) and the error is returned as is.
pub struct ErrorInterceptor {
    refresh: Arc<RefreshCoordinator>,
    policy: Arc<EndpointPolicy>,
}

impl ErrorInterceptor {
    pub fn new(refresh: Arc<RefreshCoordinator>, policy: Arc<EndpointPolicy>) -> Self {
        Self { refresh, policy }
    }

    fn may_refresh(&self, ctx: &RequestContext) -> bool {
        ctx.attempt == 0 && !ctx.is_public && !self.policy.is_auth_endpoint(&ctx.method, &ctx.path)
    }
}

#[async_trait]
impl ResponseInterceptor for ErrorInterceptor {
    fn name(&self) -> &str {
        "error"
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        result: TetherResult<HttpResponse>,
    ) -> ResponseAction {
        let response = match result {
            Ok(response) if response.is_success() => return ResponseAction::Next(Ok(response)),
            Ok(response) => response,
            Err(e) => return ResponseAction::Next(Err(e)),
        };

        if response.status != 401 || !self.may_refresh(ctx) {
            return ResponseAction::Next(Err(response.into_error()));
        }

        info!("{} returned 401, refreshing credentials", ctx.label());
        match self.refresh.refresh_rejected(ctx.bearer_token.as_deref()).await {
            Ok(_) => ResponseAction::Retry,
            Err(e) => {
                debug!("{} not retried: {e}", ctx.label());
                ResponseAction::Done(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use tether_core::credentials::CredentialStore;
    use tether_core::error::TetherError;
    use tether_core::events::{ClientEvent, EventBus};
    use reqwest::Method;
    use std::time::Duration;
    use tether_core::config::HttpConfig;
    use tether_core::storage::MemoryStore;

    use crate::response::ResponseBody;

    fn ctx(method: Method, path: &str, is_public: bool) -> RequestContext {
        RequestContext::new(
            method,
            format!("http://127.0.0.1:9{path}"),
            path.to_string(),
            is_public,
            0,
        )
    }

    fn response(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Text("body".into()),
            elapsed: Duration::ZERO,
        }
    }

    fn error_interceptor() -> (ErrorInterceptor, EventBus) {
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()));
        let events = EventBus::new(16);
        let refresh = Arc::new(
            RefreshCoordinator::new(
                reqwest::Client::new(),
                "http://127.0.0.1:9/auth/refresh-token",
                Duration::from_millis(200),
                credentials,
            )
            .with_events(events.clone()),
        );
        let policy = Arc::new(EndpointPolicy::from_config(&HttpConfig::default()).unwrap());
        (ErrorInterceptor::new(refresh, policy), events)
    }

    #[tokio::test]
    async fn test_timing_stamps_request_id() {
        let mut ctx = ctx(Method::GET, "/users", false);
        TimingInterceptor.on_request(&mut ctx).await.unwrap();
        let id = ctx.request_id.clone().unwrap();
        assert_eq!(ctx.header("x-request-id"), Some(id.as_str()));
        assert!(ctx.started_at.is_some());
    }

    #[tokio::test]
    async fn test_error_interceptor_converts_failing_status() {
        let (interceptor, _) = error_interceptor();
        let action = interceptor
            .on_response(&ctx(Method::GET, "/users", false), Ok(response(500)))
            .await;
        match action {
            ResponseAction::Next(Err(TetherError::Http { status, body })) => {
                assert_eq!(status, 500);
                assert_eq!(body, "body");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_interceptor_passes_success_through() {
        let (interceptor, _) = error_interceptor();
        let action = interceptor
            .on_response(&ctx(Method::GET, "/users", false), Ok(response(200)))
            .await;
        assert!(matches!(action, ResponseAction::Next(Ok(_))));
    }

    #[tokio::test]
    async fn test_401_on_auth_endpoint_is_final() {
        let (interceptor, events) = error_interceptor();
        let mut rx = events.subscribe();
        let action = interceptor
            .on_response(&ctx(Method::POST, "/auth/login", true), Ok(response(401)))
            .await;
        assert!(matches!(
            action,
            ResponseAction::Next(Err(TetherError::Http { status: 401, .. }))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_401_without_refresh_token_expires_session() {
        let (interceptor, events) = error_interceptor();
        let mut rx = events.subscribe();
        let action = interceptor
            .on_response(&ctx(Method::GET, "/users", false), Ok(response(401)))
            .await;
        assert!(matches!(action, ResponseAction::Done(Err(TetherError::Auth(_)))));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientEvent::SessionExpired { .. }
        ));
    }

    #[tokio::test]
    async fn test_401_on_retry_is_not_retried_again() {
        let (interceptor, _) = error_interceptor();
        let mut retry_ctx = ctx(Method::GET, "/users", false);
        retry_ctx.attempt = 1;
        let action = interceptor.on_response(&retry_ctx, Ok(response(401))).await;
        assert!(matches!(
            action,
            ResponseAction::Next(Err(TetherError::Http { status: 401, .. }))
        ));
    }
}
