//! Tether CLI - drive the Tether client layer from a terminal.
//!
//! Useful for poking at a backend by hand, scripting against it, and watching
//! the live socket while debugging reconnection behavior.

mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tether_core::config::{ConfigHandle, TetherConfig};
use tether_core::error::TetherResult;
use tether_core::logging;

/// Tether - resilient HTTP + socket client.
#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Resilient HTTP and socket client",
    long_about = "A command-line front end for the Tether client layer.\n\
                  Issue authenticated requests, hold a live socket open and manage stored credentials."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an HTTP request through the interceptor pipeline.
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE).
        method: String,
        /// Path relative to the base URL, or an absolute URL.
        path: String,
        /// JSON request body.
        #[arg(short, long)]
        body: Option<String>,
        /// Extra header as `Name: value`. Repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Send without credentials.
        #[arg(long)]
        public: bool,
        /// Serve GET responses from the local cache for this many seconds.
        #[arg(long)]
        cache_ttl: Option<u64>,
    },
    /// Download a resource to a file.
    Download {
        /// Path relative to the base URL, or an absolute URL.
        path: String,
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Connect the socket and print events until Ctrl-C.
    Listen {
        /// Channel to join. Repeatable.
        #[arg(short = 'c', long = "channel")]
        channels: Vec<String>,
    },
    /// Send one frame over the socket.
    Send {
        /// Frame type.
        kind: String,
        /// JSON payload.
        #[arg(short, long)]
        payload: Option<String>,
        /// Wait for the correlated reply.
        #[arg(short, long)]
        wait: bool,
        /// Reply timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Store credentials.
    Login {
        /// Access token.
        #[arg(long)]
        access_token: String,
        /// Refresh token.
        #[arg(long)]
        refresh_token: Option<String>,
        /// Access token lifetime in seconds.
        #[arg(long, default_value = "3600")]
        expires_in: i64,
    },
    /// Forget stored credentials.
    Logout,
    /// Show configuration and credential status.
    Status,
    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

/// Load the config from `path`, or the default location, or defaults.
fn load_config(path: Option<&Path>) -> TetherResult<(TetherConfig, PathBuf)> {
    match path {
        Some(path) => Ok((TetherConfig::load_from_file(path)?, path.to_path_buf())),
        None => {
            let default_path = TetherConfig::default_config_path()
                .unwrap_or_else(|_| PathBuf::from("config.toml"));
            let config = if default_path.exists() {
                TetherConfig::load_from_file(&default_path)?
            } else {
                TetherConfig::default()
            };
            Ok((config, default_path))
        }
    }
}

#[tokio::main]
async fn main() -> TetherResult<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_config(cli.config.as_deref().map(Path::new))?;

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let _guard = match config.effective_log_dir() {
        Ok(log_dir) => match logging::init_logging(&log_level, &log_dir, config.logging.json_output) {
            Ok(guard) => Some(guard),
            Err(e) => {
                logging::init_console_logging(&log_level);
                warn!("file logging unavailable: {e}");
                None
            }
        },
        Err(_) => {
            logging::init_console_logging(&log_level);
            None
        }
    };

    let config_handle = ConfigHandle::new(config);

    info!("Tether CLI v{}", tether_core::constants::CLIENT_VERSION);

    // Dispatch to command handlers
    match cli.command {
        Commands::Request {
            method,
            path,
            body,
            headers,
            public,
            cache_ttl,
        } => {
            let args = commands::request::RequestArgs {
                method,
                path,
                body,
                headers,
                public,
                cache_ttl,
            };
            commands::request::run(config_handle, args, cli.format).await
        }
        Commands::Download { path, output } => {
            commands::download::run(config_handle, path, output, cli.format).await
        }
        Commands::Listen { channels } => {
            commands::listen::run(config_handle, channels, cli.format).await
        }
        Commands::Send {
            kind,
            payload,
            wait,
            timeout_ms,
        } => commands::send::run(config_handle, kind, payload, wait, timeout_ms, cli.format).await,
        Commands::Login {
            access_token,
            refresh_token,
            expires_in,
        } => {
            commands::auth::login(config_handle, access_token, refresh_token, expires_in, cli.format)
                .await
        }
        Commands::Logout => commands::auth::logout(config_handle, cli.format).await,
        Commands::Status => commands::status::run(config_handle, cli.format).await,
        Commands::Config { action } => {
            commands::config::run(config_handle, action, config_path, cli.format).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_request() {
        let cli = Cli::try_parse_from([
            "tether", "--format", "json", "request", "post", "/users", "--body", r#"{"a":1}"#,
            "-H", "X-Trace: 1", "--public",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Request {
                method,
                path,
                body,
                headers,
                public,
                cache_ttl,
            } => {
                assert_eq!(method, "post");
                assert_eq!(path, "/users");
                assert_eq!(body.as_deref(), Some(r#"{"a":1}"#));
                assert_eq!(headers, vec!["X-Trace: 1".to_string()]);
                assert!(public);
                assert_eq!(cache_ttl, None);
            }
            _ => panic!("expected request command"),
        }
    }

    #[test]
    fn test_cli_parses_listen_channels() {
        let cli = Cli::try_parse_from(["tether", "listen", "-c", "news", "-c", "alerts"]).unwrap();
        match cli.command {
            Commands::Listen { channels } => assert_eq!(channels, vec!["news", "alerts"]),
            _ => panic!("expected listen command"),
        }
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[http]\nbase_url = \"https://api.example.com\"\n").unwrap();

        let (config, resolved) = load_config(Some(&path)).unwrap();
        assert_eq!(config.http.base_url, "https://api.example.com");
        assert_eq!(resolved, path);
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
