//! Status command - show configuration and credential state.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;

use tether_core::config::ConfigHandle;
use tether_core::error::TetherResult;
use tether_core::paths;

use crate::OutputFormat;

/// Run the status command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> TetherResult<()> {
    let credentials = super::open_credentials(&config).await?;
    let credential = credentials.get();
    let authenticated = credentials.is_authenticated();

    let cfg = config.read().await;
    let socket_url = cfg.socket_url().ok();
    let store_path = cfg.effective_storage_path()?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "platform": paths::os_name(),
                "base_url": cfg.http.base_url,
                "socket_url": socket_url,
                "store": store_path.display().to_string(),
                "authenticated": authenticated,
                "has_refresh_token": credential.refresh_token.is_some(),
                "expires_at": credential.expires_at,
                "reconnect": {
                    "max_attempts": cfg.socket.max_reconnect_attempts,
                    "base_backoff_ms": cfg.socket.base_backoff_ms,
                    "max_backoff_ms": cfg.socket.max_backoff_ms,
                    "multiplier": cfg.socket.backoff_multiplier,
                },
            });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("{}", style("Endpoints").bold().underlined());
            let base_url = if cfg.http.base_url.is_empty() {
                style("(not set)").yellow().to_string()
            } else {
                cfg.http.base_url.clone()
            };
            println!("  HTTP:    {base_url}");
            println!(
                "  Socket:  {}",
                socket_url.unwrap_or_else(|| style("(not set)").yellow().to_string())
            );
            println!("  Store:   {}", store_path.display());

            println!();
            println!("{}", style("Session").bold().underlined());
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Field", "Value"]);
            table.add_row(vec![
                "Access token".to_string(),
                credential
                    .access_token
                    .as_deref()
                    .map(super::mask_token)
                    .unwrap_or_else(|| "-".into()),
            ]);
            table.add_row(vec![
                "Refresh token".to_string(),
                (if credential.refresh_token.is_some() { "present" } else { "-" }).to_string(),
            ]);
            table.add_row(vec![
                "Expires".to_string(),
                credential
                    .expires_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "-".into()),
            ]);
            table.add_row(vec![
                "State".to_string(),
                if authenticated {
                    style("authenticated").green().to_string()
                } else if credential.access_token.is_some() {
                    style("expired").yellow().to_string()
                } else {
                    style("signed out").red().to_string()
                },
            ]);
            println!("{table}");
        }
    }

    Ok(())
}
