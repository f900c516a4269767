//! Credential store.
//!
//! Single source of truth for the access/refresh token pair. Reads go
//! straight to the backing `KeyValueStore` so every request and handshake
//! sees the latest value. Storage failures never reach the caller: a failed
//! read is "no credential", a failed write is logged. Losing a cached token
//! degrades to re-authentication rather than an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::keys;
use crate::storage::KeyValueStore;

/// The current session credential. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Credential with all three fields present.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
            expires_at: Some(expires_at),
        }
    }

    /// True when `expires_at` is absent or not strictly after `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }

    /// Whether nothing at all is stored.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.expires_at.is_none()
    }
}

/// Process-wide credential holder backed by durable storage.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the current credential.
    pub fn get(&self) -> Credential {
        let expires_at = self.read(keys::EXPIRES_AT).and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    warn!("ignoring unparseable credential expiry {raw:?}: {e}");
                    None
                }
            }
        });

        Credential {
            access_token: self.read(keys::ACCESS_TOKEN),
            refresh_token: self.read(keys::REFRESH_TOKEN),
            expires_at,
        }
    }

    /// Replace the stored credential. Absent fields are removed.
    pub fn set(&self, credential: &Credential) {
        self.write(keys::ACCESS_TOKEN, credential.access_token.as_deref());
        self.write(keys::REFRESH_TOKEN, credential.refresh_token.as_deref());
        let expires = credential.expires_at.map(|dt| dt.to_rfc3339());
        self.write(keys::EXPIRES_AT, expires.as_deref());
        debug!("credential stored (expires_at={:?})", credential.expires_at);
    }

    /// Store a refreshed token pair, keeping the old refresh token when the
    /// server did not rotate it.
    pub fn update_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) {
        let refresh_token = refresh_token
            .map(str::to_string)
            .or_else(|| self.read(keys::REFRESH_TOKEN));
        self.set(&Credential::new(access_token, refresh_token, expires_at));
    }

    /// Remove every credential field.
    pub fn clear(&self) {
        for key in [keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::EXPIRES_AT] {
            if let Err(e) = self.store.remove(key) {
                warn!("failed to clear {key}: {e}");
            }
        }
        debug!("credential cleared");
    }

    /// True when the stored expiry is absent or not in the future.
    pub fn is_expired(&self) -> bool {
        self.get().is_expired_at(Utc::now())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(keys::ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(keys::REFRESH_TOKEN)
    }

    /// An access token is present and not expired.
    pub fn is_authenticated(&self) -> bool {
        let credential = self.get();
        credential.access_token.is_some() && !credential.is_expired_at(Utc::now())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("failed to read {key}: {e}");
                None
            }
        }
    }

    fn write(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(v) => self.store.set(key, v),
            None => self.store.remove(key),
        };
        if let Err(e) = result {
            warn!("failed to write {key}: {e}");
        }
    }
}
