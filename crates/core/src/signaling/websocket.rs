//! WebSocket client for the meetmesh relay server
//!
//! One connection per joined session. Outbound frames go through a channel
//! to a single writer; inbound broadcast frames are unwrapped into
//! [`SignalingMessage`]s.

use super::frame::RelayFrame;
use super::relay::{RelayPublisher, RelaySubscription, SignalingRelay};
use super::SignalingMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Relay reached over WebSocket, e.g. `ws://localhost:8080`
#[derive(Debug, Clone)]
pub struct WebSocketRelay {
    url: String,
}

impl WebSocketRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

struct WsPublisher {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl RelayPublisher for WsPublisher {
    async fn publish(&self, message: SignalingMessage) -> Result<()> {
        let text = RelayFrame::Broadcast { message }.to_json()?;
        self.tx
            .send(text)
            .await
            .map_err(|_| Error::Relay("relay connection closed".to_string()))
    }
}

#[async_trait]
impl SignalingRelay for WebSocketRelay {
    async fn join(&self, session_id: &str) -> Result<RelaySubscription> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Relay(format!("Failed to connect to {}: {}", self.url, e)))?;

        info!("Connected to relay {} for session {}", self.url, session_id);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        ws_tx
            .send(Message::Text(RelayFrame::join(session_id).to_json()?))
            .await
            .map_err(|e| Error::Relay(format!("Failed to send join frame: {}", e)))?;

        let (out_tx, mut out_rx) = mpsc::channel::<String>(128);
        let (in_tx, in_rx) = mpsc::channel::<SignalingMessage>(256);
        let (leave_tx, mut leave_rx) = oneshot::channel::<()>();

        let session = session_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut leave_rx => {
                        debug!("Leaving relay session {}", session);
                        let leave = RelayFrame::Leave.to_json().unwrap_or_default();
                        let _ = ws_tx.send(Message::Text(leave)).await;
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    outgoing = out_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                                warn!("Relay send failed for session {}: {}", session, e);
                                break;
                            }
                        }
                        None => {
                            let leave = RelayFrame::Leave.to_json().unwrap_or_default();
                            let _ = ws_tx.send(Message::Text(leave)).await;
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    incoming = ws_rx.next() => match incoming {
                        Some(Ok(Message::Text(text))) => match RelayFrame::from_json(&text) {
                            Ok(RelayFrame::Broadcast { message }) => {
                                if in_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Ok(RelayFrame::Joined { session }) => {
                                debug!("Relay confirmed join of session {}", session);
                            }
                            Ok(RelayFrame::Error { message }) => {
                                warn!("Relay reported error: {}", message);
                            }
                            Ok(other) => {
                                debug!("Ignoring unexpected relay frame: {:?}", other);
                            }
                            Err(e) => {
                                warn!("Malformed relay frame: {}", e);
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_tx.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Relay connection closed for session {}", session);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Relay connection error for session {}: {}", session, e);
                            break;
                        }
                    },
                }
            }
        });

        Ok(RelaySubscription::new(
            session_id,
            Arc::new(WsPublisher { tx: out_tx }),
            in_rx,
            Some(task),
        )
        .with_leave_signal(leave_tx))
    }
}
