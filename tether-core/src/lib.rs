//! Tether Core - Foundation types shared by the HTTP and socket clients.
//!
//! This crate provides the pieces every other Tether crate builds on:
//! - Global error type covering the transport error taxonomy
//! - Configuration (TOML on disk, defaults for every option)
//! - Structured logging with tracing
//! - Durable key-value storage and a TTL cache on top of it
//! - The credential store holding access/refresh tokens
//! - The typed event bus used for lifecycle notifications

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod events;
pub mod logging;
pub mod paths;
pub mod storage;

// Re-export commonly used items at the crate root
pub use config::{ConfigHandle, TetherConfig};
pub use credentials::{Credential, CredentialStore};
pub use error::{TetherError, TetherResult};
pub use events::{ClientEvent, ConnectionState, EventBus, ListenerHandle};
pub use logging::init_logging;
pub use paths::AppPaths;
pub use storage::{FileStore, KeyValueStore, MemoryStore, TtlCache};
