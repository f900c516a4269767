//! Tether HTTP - request pipeline for the Tether client layer.
//!
//! Provides:
//! - `HttpClient`: reqwest wrapper with base URL resolution and timeouts
//! - Interceptor pipeline (auth, timing, error) with user extension points
//! - `RefreshCoordinator`: single-flight access token refresh
//! - `EndpointPolicy`: explicit public/auth endpoint allowlists

pub mod client;
pub mod endpoints;
pub mod interceptor;
pub mod refresh;
pub mod request;
pub mod response;

pub use client::HttpClient;
pub use endpoints::{Endpoint, EndpointPolicy};
pub use interceptor::{RequestInterceptor, ResponseAction, ResponseInterceptor};
pub use refresh::RefreshCoordinator;
pub use request::{RequestBody, RequestConfig, RequestContext, ResponseKind, UploadPart};
pub use response::{HttpResponse, ResponseBody};
pub use reqwest::Method;
