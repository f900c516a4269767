//! Endpoint identity and the public/auth allowlists.
//!
//! Endpoints are identified by `(method, path)`. The path is taken from the
//! resolved request URL with the base URL's path prefix and any query string
//! removed, then compared exactly.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use reqwest::{Method, Url};

use tether_core::config::HttpConfig;
use tether_core::error::{TetherError, TetherResult};

/// A `(method, path)` pair. A missing method matches every method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    method: Option<Method>,
    path: String,
}

impl Endpoint {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method: Some(method),
            path: normalize_path(path),
        }
    }

    /// Endpoint matching `path` under any method.
    pub fn any_method(path: &str) -> Self {
        Self {
            method: None,
            path: normalize_path(path),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FromStr for Endpoint {
    type Err = TetherError;

    /// Parse `"POST /auth/login"` or a bare `"/health"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(char::is_whitespace) {
            Some((method, path)) => {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| TetherError::Config(format!("invalid endpoint method in {s:?}")))?;
                let path = path.trim();
                if !path.starts_with('/') {
                    return Err(TetherError::Config(format!(
                        "endpoint path must start with '/': {s:?}"
                    )));
                }
                Ok(Self::new(method, path))
            }
            None if s.starts_with('/') => Ok(Self::any_method(s)),
            None => Err(TetherError::Config(format!("invalid endpoint {s:?}"))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{method} {}", self.path),
            None => write!(f, "* {}", self.path),
        }
    }
}

/// Which endpoints skip credentials and which skip the 401 refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct EndpointPolicy {
    public: HashSet<Endpoint>,
    auth: HashSet<Endpoint>,
}

impl EndpointPolicy {
    pub fn new(
        public: impl IntoIterator<Item = Endpoint>,
        auth: impl IntoIterator<Item = Endpoint>,
    ) -> Self {
        Self {
            public: public.into_iter().collect(),
            auth: auth.into_iter().collect(),
        }
    }

    /// Build the policy from configuration.
    ///
    /// Every public endpoint is also an auth endpoint (login and register
    /// never carry a token worth refreshing), and the refresh endpoint is
    /// always both.
    pub fn from_config(config: &HttpConfig) -> TetherResult<Self> {
        let mut public = config
            .public_endpoints
            .iter()
            .map(|s| s.parse::<Endpoint>())
            .collect::<TetherResult<HashSet<_>>>()?;
        public.insert(Endpoint::new(Method::POST, &config.refresh_path));

        let auth = public.clone();
        Ok(Self { public, auth })
    }

    /// Whether requests to this endpoint are sent without credentials.
    pub fn is_public(&self, method: &Method, path: &str) -> bool {
        contains(&self.public, method, path)
    }

    /// Whether a 401 from this endpoint is final (no refresh-and-retry).
    pub fn is_auth_endpoint(&self, method: &Method, path: &str) -> bool {
        contains(&self.auth, method, path)
    }

    pub fn add_public(&mut self, endpoint: Endpoint) {
        self.public.insert(endpoint);
    }

    pub fn add_auth(&mut self, endpoint: Endpoint) {
        self.auth.insert(endpoint);
    }
}

fn contains(set: &HashSet<Endpoint>, method: &Method, path: &str) -> bool {
    let path = normalize_path(path);
    set.contains(&Endpoint {
        method: Some(method.clone()),
        path: path.clone(),
    }) || set.contains(&Endpoint { method: None, path })
}

/// Strip the query string and any trailing slash; ensure a leading slash.
fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Endpoint path of `url` relative to `base_url`.
///
/// `https://api.example.com/v1/users?page=2` under base
/// `https://api.example.com/v1` yields `/users`. URLs outside the base keep
/// their full path.
pub fn endpoint_path(base_url: &str, url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return normalize_path(url);
    };
    let full = normalize_path(parsed.path());

    let base_path = Url::parse(base_url)
        .ok()
        .filter(|base| base.host_str() == parsed.host_str())
        .map(|base| normalize_path(base.path()))
        .unwrap_or_else(|| "/".to_string());

    if base_path == "/" {
        return full;
    }
    match full.strip_prefix(&base_path) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => full,
    }
}
