//! Shared test utilities for HTTP integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tether_core::config::HttpConfig;
use tether_core::credentials::{Credential, CredentialStore};
use tether_core::events::EventBus;
use tether_core::storage::MemoryStore;
use tether_http::HttpClient;
use wiremock::MockServer;

/// Everything a pipeline test needs, pointed at a fresh mock server.
pub struct TestClient {
    pub server: MockServer,
    pub client: HttpClient,
    pub credentials: CredentialStore,
    pub events: EventBus,
}

pub async fn setup() -> TestClient {
    setup_with(|_| {}).await
}

/// Like `setup`, letting the test adjust the config first.
pub async fn setup_with(adjust: impl FnOnce(&mut HttpConfig)) -> TestClient {
    let server = MockServer::start().await;
    let mut config = HttpConfig {
        base_url: server.uri(),
        timeout_ms: 2_000,
        refresh_timeout_ms: 2_000,
        ..Default::default()
    };
    adjust(&mut config);

    let credentials = CredentialStore::new(Arc::new(MemoryStore::new()));
    let events = EventBus::new(64);
    let client = HttpClient::new(&config, credentials.clone(), events.clone())
        .expect("failed to build client");

    TestClient {
        server,
        client,
        credentials,
        events,
    }
}

/// Store a token that stays valid for an hour.
pub fn store_valid_token(credentials: &CredentialStore, access: &str, refresh: &str) {
    credentials.set(&Credential::new(
        access,
        Some(refresh.to_string()),
        Utc::now() + Duration::hours(1),
    ));
}

/// Store a token that expired a minute ago.
pub fn store_expired_token(credentials: &CredentialStore, access: &str, refresh: &str) {
    credentials.set(&Credential::new(
        access,
        Some(refresh.to_string()),
        Utc::now() - Duration::minutes(1),
    ));
}

/// Successful refresh endpoint body.
pub fn refresh_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresAt": (Utc::now() + Duration::hours(1)).to_rfc3339(),
    })
}
