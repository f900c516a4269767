//! Login/logout commands - manage the stored credential.

use console::style;

use tether_core::config::ConfigHandle;
use tether_core::credentials::{Credential, CredentialStore};
use tether_core::error::{TetherError, TetherResult};

use crate::OutputFormat;

/// Store a credential, valid for `expires_in` seconds from now.
pub async fn login(
    config: ConfigHandle,
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    format: OutputFormat,
) -> TetherResult<()> {
    let credentials = super::open_credentials(&config).await?;
    let credential = build_credential(access_token, refresh_token, expires_in)?;
    credentials.set(&credential);
    report(&credentials, "stored", format);
    Ok(())
}

/// Forget the stored credential.
pub async fn logout(config: ConfigHandle, format: OutputFormat) -> TetherResult<()> {
    let credentials = super::open_credentials(&config).await?;
    credentials.clear();
    report(&credentials, "cleared", format);
    Ok(())
}

fn build_credential(
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
) -> TetherResult<Credential> {
    if access_token.trim().is_empty() {
        return Err(TetherError::Config("access token must not be empty".into()));
    }
    if expires_in <= 0 {
        return Err(TetherError::Config("expires-in must be positive".into()));
    }
    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(expires_in);
    Ok(Credential::new(
        access_token,
        refresh_token.filter(|t| !t.trim().is_empty()),
        expires_at,
    ))
}

fn report(credentials: &CredentialStore, action: &str, format: OutputFormat) {
    let credential = credentials.get();
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "credentials": action,
                "authenticated": credentials.is_authenticated(),
                "expires_at": credential.expires_at,
            });
            println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("{} Credentials {action}", style("OK").green().bold());
            if let Some(expires_at) = credential.expires_at {
                println!("  Expires: {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
    }
}
