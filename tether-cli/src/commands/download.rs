//! Download command - fetch a resource to disk with a progress bar.

use std::path::PathBuf;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use tether_core::config::ConfigHandle;
use tether_core::error::TetherResult;

use crate::OutputFormat;

/// Run the download command.
pub async fn run(
    config: ConfigHandle,
    path: String,
    output: PathBuf,
    format: OutputFormat,
) -> TetherResult<()> {
    let credentials = super::open_credentials(&config).await?;
    let client = super::create_http_client(&config, credentials, super::new_event_bus()).await?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  Downloading {spinner} {bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    if format == OutputFormat::Json {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let progress = pb.clone();
    let result = client
        .download_with_progress(&path, move |downloaded, total| {
            // Switch to a bar once the server announces a length.
            if total > 0 && progress.length() != Some(total) {
                progress.set_length(total);
                progress.set_style(
                    ProgressStyle::default_bar()
                        .template("  Downloading [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=>-"),
                );
            }
            progress.set_position(downloaded);
        })
        .await;

    let bytes = match result {
        Ok(bytes) => {
            pb.finish_and_clear();
            bytes
        }
        Err(e) => {
            pb.abandon();
            return Err(e);
        }
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, &bytes)?;

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "path": output.display().to_string(),
                "bytes": bytes.len(),
            });
            println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        }
        OutputFormat::Text => println!(
            "{} Saved {} to {}",
            style("OK").green().bold(),
            super::format_bytes(bytes.len() as u64),
            output.display()
        ),
    }
    Ok(())
}
