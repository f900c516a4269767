//! Config commands.

use std::path::PathBuf;

use clap::Subcommand;
use console::style;

use tether_core::config::{ConfigHandle, TetherConfig};
use tether_core::error::{TetherError, TetherResult};

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Print the configuration file path.
    Path,
    /// Write a configuration file with every option at its default.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub async fn run(
    config: ConfigHandle,
    action: ConfigAction,
    path: PathBuf,
    format: OutputFormat,
) -> TetherResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.snapshot().await;
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&cfg).unwrap_or_default()
                ),
                OutputFormat::Text => println!("{}", render_toml(&cfg)?),
            }
        }
        ConfigAction::Path => match format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "path": path.display().to_string(), "exists": path.exists() })
            ),
            OutputFormat::Text => println!("{}", path.display()),
        },
        ConfigAction::Init { force } => {
            init(&path, force)?;
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "path": path.display().to_string(), "written": true })
                ),
                OutputFormat::Text => println!(
                    "{} Wrote default configuration to {}",
                    style("OK").green().bold(),
                    path.display()
                ),
            }
        }
    }
    Ok(())
}

fn render_toml(config: &TetherConfig) -> TetherResult<String> {
    toml::to_string_pretty(config)
        .map_err(|e| TetherError::Config(format!("failed to serialize config: {e}")))
}

fn init(path: &std::path::Path, force: bool) -> TetherResult<()> {
    if path.exists() && !force {
        return Err(TetherError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    TetherConfig::default().save_to_file(path)
}
