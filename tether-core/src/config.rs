//! Client configuration.
//!
//! Every recognized option has a default so the layer works with zero
//! configuration. Configuration is persisted as TOML on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{TetherError, TetherResult};
use crate::paths::AppPaths;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TetherConfig {
    /// HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Socket connection settings.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Credential/cache storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL relative request paths are joined onto (e.g. "https://api.example.com").
    #[serde(default)]
    pub base_url: String,

    /// Default per-request timeout in milliseconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_ms: u64,

    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Statuses a caller-side retry policy may retry.
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,

    /// Path of the token refresh endpoint.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Deadline for a single refresh call in milliseconds.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_ms: u64,

    /// Header name carrying the client version.
    #[serde(default = "default_client_version_header")]
    pub client_version_header: String,

    /// Endpoints sent without credentials, as "METHOD /path".
    #[serde(default = "default_public_endpoints")]
    pub public_endpoints: Vec<String>,

    /// Extra headers attached to every request.
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    /// Accept self-signed / invalid TLS certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Socket connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Explicit socket URL. When empty it is derived from `http.base_url`.
    #[serde(default)]
    pub url: String,

    /// Path appended when deriving the socket URL from the HTTP base URL.
    #[serde(default = "default_socket_path")]
    pub path: String,

    /// Consecutive failed reconnects before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Reconnect delay cap in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Growth factor applied per attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Random spread applied to each delay (0.0 disables jitter).
    #[serde(default)]
    pub jitter_factor: f64,

    /// Keep-alive ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Unanswered pings tolerated before the link is declared dead.
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,

    /// Default deadline for correlated requests in milliseconds.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Deadline for the connection handshake in milliseconds.
    #[serde(default = "default_socket_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum frames held in the outbound queue while disconnected.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Query parameter carrying the access token during the handshake.
    #[serde(default = "default_token_query_param")]
    pub token_query_param: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the store file. If empty, uses the platform data dir.
    #[serde(default)]
    pub directory: String,

    /// Store file name.
    #[serde(default = "default_store_file")]
    pub file_name: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses the platform data dir.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_http_timeout() -> u64 {
    constants::DEFAULT_HTTP_TIMEOUT_MS
}

fn default_connect_timeout() -> u64 {
    15_000
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 429, 502, 503, 504]
}

fn default_refresh_path() -> String {
    constants::REFRESH_PATH.to_string()
}

fn default_refresh_timeout() -> u64 {
    15_000
}

fn default_client_version_header() -> String {
    constants::CLIENT_VERSION_HEADER.to_string()
}

fn default_public_endpoints() -> Vec<String> {
    vec![
        "POST /auth/login".to_string(),
        "POST /auth/register".to_string(),
        format!("POST {}", constants::REFRESH_PATH),
    ]
}

fn default_socket_path() -> String {
    "/ws".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_base_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_heartbeat_interval() -> u64 {
    25_000
}

fn default_max_missed_heartbeats() -> u32 {
    2
}

fn default_response_timeout() -> u64 {
    constants::DEFAULT_RESPONSE_TIMEOUT_MS
}

fn default_socket_connect_timeout() -> u64 {
    10_000
}

fn default_max_queue_size() -> usize {
    1_000
}

fn default_token_query_param() -> String {
    "token".to_string()
}

fn default_store_file() -> String {
    "store.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: default_http_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            retryable_statuses: default_retryable_statuses(),
            refresh_path: default_refresh_path(),
            refresh_timeout_ms: default_refresh_timeout(),
            client_version_header: default_client_version_header(),
            public_endpoints: default_public_endpoints(),
            custom_headers: HashMap::new(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            path: default_socket_path(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: 0.0,
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
            response_timeout_ms: default_response_timeout(),
            connect_timeout_ms: default_socket_connect_timeout(),
            max_queue_size: default_max_queue_size(),
            token_query_param: default_token_query_param(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: String::new(),
            file_name: default_store_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl HttpConfig {
    /// Default request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Refresh call deadline.
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

impl SocketConfig {
    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Default correlated request deadline.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Handshake deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl TetherConfig {
    /// Load configuration from the default config file path, or defaults if absent.
    pub fn load_default() -> TetherResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> TetherResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TetherConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> TetherResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> TetherResult<PathBuf> {
        Ok(AppPaths::resolve()?.config_file())
    }

    /// Effective store file path, using the configured directory or the default.
    pub fn effective_storage_path(&self) -> TetherResult<PathBuf> {
        if self.storage.directory.is_empty() {
            Ok(AppPaths::resolve()?.store_file(&self.storage.file_name))
        } else {
            Ok(PathBuf::from(&self.storage.directory).join(&self.storage.file_name))
        }
    }

    /// Effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> TetherResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(AppPaths::resolve()?.log_dir())
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Socket URL: explicit `socket.url`, or derived from `http.base_url`.
    ///
    /// `http://host` becomes `ws://host{path}`, `https://host` becomes
    /// `wss://host{path}`.
    pub fn socket_url(&self) -> TetherResult<String> {
        if !self.socket.url.trim().is_empty() {
            return Ok(self.socket.url.trim().trim_end_matches('/').to_string());
        }

        let base = Self::sanitize_base_url(&self.http.base_url);
        if base.is_empty() {
            return Err(TetherError::MissingConfig("socket url or http base url".into()));
        }

        let derived = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base
        };
        Ok(format!("{derived}{}", self.socket.path))
    }

    /// Sanitize and normalize a base URL.
    ///
    /// Strips quotes, whitespace and trailing slashes; adds `https://` when
    /// the scheme is missing, or `http://` for localhost addresses.
    pub fn sanitize_base_url(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
            format!("http://{trimmed}")
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<TetherConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: TetherConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, TetherConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, TetherConfig> {
        self.inner.write().await
    }

    /// Snapshot of the current configuration.
    pub async fn snapshot(&self) -> TetherConfig {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TetherConfig::default();
        assert_eq!(config.http.timeout_ms, 30_000);
        assert_eq!(config.http.retryable_statuses, vec![408, 429, 502, 503, 504]);
        assert_eq!(config.socket.max_reconnect_attempts, 10);
        assert_eq!(config.socket.response_timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: TetherConfig = toml::from_str("").unwrap();
        assert_eq!(config.socket.base_backoff_ms, 1_000);
        assert_eq!(config.http.refresh_path, "/auth/refresh-token");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: TetherConfig = toml::from_str(
            r#"
            [socket]
            max_reconnect_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.socket.max_reconnect_attempts, 3);
        assert_eq!(config.socket.max_backoff_ms, 30_000);
        assert_eq!(config.socket.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_sanitize_base_url() {
        assert_eq!(
            TetherConfig::sanitize_base_url("api.example.com/"),
            "https://api.example.com"
        );
        assert_eq!(
            TetherConfig::sanitize_base_url("  \"http://10.0.0.5:8080/\"  "),
            "http://10.0.0.5:8080"
        );
        assert_eq!(
            TetherConfig::sanitize_base_url("localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(TetherConfig::sanitize_base_url("   "), "");
    }

    #[test]
    fn test_socket_url_derivation() {
        let mut config = TetherConfig::default();
        config.http.base_url = "https://api.example.com".into();
        assert_eq!(config.socket_url().unwrap(), "wss://api.example.com/ws");

        config.http.base_url = "http://localhost:3000/".into();
        assert_eq!(config.socket_url().unwrap(), "ws://localhost:3000/ws");

        config.socket.url = "wss://rt.example.com/socket/".into();
        assert_eq!(config.socket_url().unwrap(), "wss://rt.example.com/socket");
    }

    #[test]
    fn test_socket_url_missing() {
        let config = TetherConfig::default();
        assert!(matches!(config.socket_url(), Err(TetherError::MissingConfig(_))));
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = TetherConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: TetherConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.http.public_endpoints, config.http.public_endpoints);
    }
}
