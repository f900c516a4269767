//! Send command - push one frame over the socket.

use std::time::Duration;

use console::style;

use tether_core::config::ConfigHandle;
use tether_core::error::TetherResult;
use tether_socket::SendOptions;

use crate::OutputFormat;

/// Run the send command.
pub async fn run(
    config: ConfigHandle,
    kind: String,
    payload: Option<String>,
    wait: bool,
    timeout_ms: Option<u64>,
    format: OutputFormat,
) -> TetherResult<()> {
    let payload = super::parse_json_arg(payload.as_deref())?;
    let credentials = super::open_credentials(&config).await?;
    let socket = super::create_socket_manager(&config, credentials, super::new_event_bus()).await?;

    socket.connect().await?;

    let mut options = if wait {
        SendOptions::request()
    } else {
        SendOptions::default().no_queue()
    };
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let result = socket.send(&kind, payload, options).await;
    socket.disconnect().await;
    let reply = result?;

    match (format, reply) {
        (OutputFormat::Json, reply) => {
            let out = serde_json::json!({ "type": kind, "sent": true, "reply": reply });
            println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        }
        (OutputFormat::Text, Some(reply)) => {
            println!("{} {kind} answered", style("OK").green().bold());
            println!("{}", serde_json::to_string_pretty(&reply).unwrap_or_default());
        }
        (OutputFormat::Text, None) => println!("{} {kind} sent", style("OK").green().bold()),
    }
    Ok(())
}
