//! Client-wide constants.

/// Application name, used for data/config directory names.
pub const APP_NAME: &str = "Tether";

/// Client version sent with every HTTP request.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default header carrying the client version.
pub const CLIENT_VERSION_HEADER: &str = "X-Client-Version";

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Default HTTP request timeout in milliseconds.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Default refresh endpoint path.
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Default timeout for a correlated socket request in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 10_000;

/// Storage keys used by the credential store.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "auth.access_token";
    pub const REFRESH_TOKEN: &str = "auth.refresh_token";
    pub const EXPIRES_AT: &str = "auth.expires_at";

    /// Prefix for TTL cache entries.
    pub const CACHE_PREFIX: &str = "cache.";
}

/// Reserved socket frame types.
pub mod frames {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";

    /// All reserved frame types.
    pub const RESERVED: &[&str] = &[PING, PONG, SUBSCRIBE, UNSUBSCRIBE];
}

/// WebSocket close codes the socket manager cares about.
pub mod close_codes {
    /// Deliberate, clean close.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (server shutdown, page navigation).
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Heartbeat replies stopped arriving.
    pub const HEARTBEAT_TIMEOUT: u16 = 4000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_frames() {
        assert_eq!(frames::RESERVED.len(), 4);
        assert!(frames::RESERVED.contains(&"ping"));
    }
}
