//! Listen command - hold the socket open and print everything it reports.

use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use tether_core::config::ConfigHandle;
use tether_core::error::TetherResult;
use tether_core::events::ClientEvent;

use crate::OutputFormat;

/// Run the listen command.
pub async fn run(
    config: ConfigHandle,
    channels: Vec<String>,
    format: OutputFormat,
) -> TetherResult<()> {
    let events = super::new_event_bus();
    let mut rx = events.subscribe();
    let credentials = super::open_credentials(&config).await?;
    let socket = super::create_socket_manager(&config, credentials, events).await?;

    if format == OutputFormat::Text {
        println!(
            "{} Connecting to {} (Ctrl-C to stop)",
            style("[tether]").bold().dim(),
            socket.url()
        );
    }

    // A failed first attempt still schedules reconnection.
    if let Err(e) = socket.connect().await {
        warn!("initial connect failed: {e}");
    } else {
        for channel in &channels {
            if let Err(e) = socket.subscribe(channel).await {
                error!("failed to join {channel}: {e}");
            }
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Ok(event) => {
                    print_event(&event, format);
                    if matches!(event, ClientEvent::ReconnectFailed { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("dropped {skipped} event(s)"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    socket.disconnect().await;
    Ok(())
}

fn print_event(event: &ClientEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", super::event_to_json(event)),
        OutputFormat::Text => {
            let line = super::event_to_text(event);
            let styled = match event {
                ClientEvent::Connected => style(line).green().to_string(),
                ClientEvent::Disconnected { .. } | ClientEvent::ReconnectFailed { .. } => {
                    style(line).red().to_string()
                }
                ClientEvent::ReconnectAttempt { .. } | ClientEvent::StateChanged { .. } => {
                    style(line).dim().to_string()
                }
                ClientEvent::SessionExpired { .. } | ClientEvent::Error { .. } => {
                    style(line).yellow().to_string()
                }
                ClientEvent::Message { .. } => line,
            };
            println!("{styled}");
        }
    }
}
