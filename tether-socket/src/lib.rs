//! Tether Socket - persistent duplex connection for the Tether client layer.
//!
//! Provides:
//! - `SocketManager`: connection state machine, reconnection with backoff,
//!   heartbeat, offline queue and channel re-join
//! - Request/response correlation over the shared connection
//! - The JSON frame envelope and its decoder
//! - A `Connector` seam with a tokio-tungstenite implementation

pub mod backoff;
pub mod correlator;
pub mod frame;
pub mod manager;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use correlator::Correlator;
pub use frame::{Frame, Inbound};
pub use manager::{SendOptions, SocketManager};
pub use transport::{Connector, Link, Outgoing, TransportEvent, WsConnector};

pub use tether_core::events::{ClientEvent, ConnectionState};
