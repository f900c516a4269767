//! Transport seam between the socket manager and the wire.
//!
//! A `Connector` opens a duplex `Link`: the manager pushes `Outgoing` frames
//! into one channel and reads `TransportEvent`s from the other. The link is
//! gone once `incoming` yields `Closed` or ends; dropping `outgoing` closes
//! it from the client side.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use tether_core::constants::close_codes;
use tether_core::error::{TetherError, TetherResult};

/// Frame the manager wants written.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

/// Something that happened on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    /// The link closed. `code` is 1006 when no close frame was received.
    Closed { code: u16, reason: String },
}

/// An open duplex link.
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens links to a socket URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> TetherResult<Link>;
}

/// WebSocket connector over tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> TetherResult<Link> {
        debug!("opening websocket to {}", redact(url));

        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TetherError::Network(format!("websocket connect failed: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = outgoing_rx.recv() => match next {
                        Some(Outgoing::Text(text)) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!("websocket send failed: {e}");
                                let _ = incoming_tx.send(TransportEvent::Closed {
                                    code: close_codes::ABNORMAL,
                                    reason: e.to_string(),
                                });
                                break;
                            }
                        }
                        Some(Outgoing::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.clone().into(),
                            };
                            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                                debug!("websocket close frame not sent: {e}");
                            }
                            let _ = incoming_tx.send(TransportEvent::Closed { code, reason });
                            break;
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    next = stream.next() => match next {
                        Some(Ok(Message::Text(text))) => {
                            if incoming_tx.send(TransportEvent::Text(text)).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                if incoming_tx.send(TransportEvent::Text(text)).is_err() {
                                    break;
                                }
                            }
                            Err(_) => debug!("dropping non-utf8 binary frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = match frame {
                                Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                                None => (close_codes::ABNORMAL, String::new()),
                            };
                            let _ = incoming_tx.send(TransportEvent::Closed { code, reason });
                            break;
                        }
                        // Ping/pong control frames are answered by tungstenite.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = incoming_tx.send(TransportEvent::Closed {
                                code: close_codes::ABNORMAL,
                                reason: e.to_string(),
                            });
                            break;
                        }
                        None => {
                            let _ = incoming_tx.send(TransportEvent::Closed {
                                code: close_codes::ABNORMAL,
                                reason: "connection reset".into(),
                            });
                            break;
                        }
                    },
                }
            }
            debug!("websocket pump finished");
        });

        Ok(Link { outgoing, incoming })
    }
}

/// URL with any query string hidden, for logs.
pub(crate) fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
