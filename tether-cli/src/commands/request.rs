//! Request command - one HTTP call through the full pipeline.

use std::time::Duration;

use console::style;
use serde_json::{json, Value};
use tracing::debug;

use tether_core::config::ConfigHandle;
use tether_core::credentials::CredentialStore;
use tether_core::error::{TetherError, TetherResult};
use tether_core::storage::TtlCache;
use tether_http::{HttpResponse, Method, RequestConfig, ResponseBody};

use crate::OutputFormat;

pub struct RequestArgs {
    pub method: String,
    pub path: String,
    pub body: Option<String>,
    pub headers: Vec<String>,
    pub public: bool,
    pub cache_ttl: Option<u64>,
}

/// Run the request command.
pub async fn run(config: ConfigHandle, args: RequestArgs, format: OutputFormat) -> TetherResult<()> {
    let method = parse_method(&args.method)?;
    let body = super::parse_json_arg(args.body.as_deref())?;

    let store = super::open_store(&config).await?;
    let cache = TtlCache::new(store.clone());
    let cache_key = format!("http:{}", args.path);
    let cacheable = method == Method::GET && args.cache_ttl.is_some();

    if let Some(ttl) = args.cache_ttl.filter(|_| cacheable) {
        if let Some(cached) = cache.get_cache(&cache_key, Duration::from_secs(ttl)) {
            debug!("serving {} from cache", args.path);
            print_cached(&cached, format);
            return Ok(());
        }
    }

    let credentials = CredentialStore::new(store);
    let client = super::create_http_client(&config, credentials, super::new_event_bus()).await?;

    let mut request = RequestConfig::new(method, args.path.as_str());
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }
    if !body.is_null() {
        request = request.json(body);
    }
    if args.public {
        request = request.public(true);
    }

    let response = client.request(request).await?;

    if cacheable {
        if let ResponseBody::Json(value) = &response.body {
            if let Err(e) = cache.set_cache(&cache_key, value) {
                debug!("response not cached: {e}");
            }
        }
    }

    print_response(&response, format);
    Ok(())
}

fn parse_method(raw: &str) -> TetherResult<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| TetherError::Config(format!("invalid HTTP method {raw:?}")))
}

/// Split `Name: value`.
fn parse_header(raw: &str) -> TetherResult<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| TetherError::Config(format!("header must be `Name: value`, got {raw:?}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(TetherError::Config(format!("header name missing in {raw:?}")));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn body_json(body: &ResponseBody) -> Value {
    match body {
        ResponseBody::Json(value) => value.clone(),
        other => Value::String(other.to_text()),
    }
}

fn print_response(response: &HttpResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = json!({
                "status": response.status,
                "elapsed_ms": response.elapsed.as_millis() as u64,
                "body": body_json(&response.body),
            });
            println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!(
                "{} ({}ms)",
                style(response.status).green().bold(),
                response.elapsed.as_millis()
            );
            match &response.body {
                ResponseBody::Json(value) => {
                    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default())
                }
                other => println!("{}", other.to_text()),
            }
        }
    }
}

fn print_cached(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = json!({ "cached": true, "body": value });
            println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("{}", style("cached").cyan().bold());
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("PATCH").unwrap(), Method::PATCH);
        assert!(parse_method("not a method").is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Trace:  abc ").unwrap(),
            ("X-Trace".to_string(), "abc".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_body_json() {
        assert_eq!(body_json(&ResponseBody::Json(json!({"a": 1}))), json!({"a": 1}));
        assert_eq!(body_json(&ResponseBody::Text("ok".into())), json!("ok"));
    }
}
