//! WebSocket connection handler for the signaling relay
//!
//! Each connection joins at most one session channel at a time. Broadcast
//! frames are fanned out to every other connection in the same session; the
//! relay never inspects or routes by the signaling payload.

use futures_util::{SinkExt, StreamExt};
use meetmesh_core::signaling::RelayFrame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, error, info, warn};

/// Outbound queue depth per connection; a full queue drops broadcasts
const OUTBOUND_BUFFER: usize = 256;

type ConnectionId = u64;

/// Session channels shared across all connections
pub struct SharedState {
    sessions: RwLock<HashMap<String, HashMap<ConnectionId, mpsc::Sender<Message>>>>,
    next_connection_id: AtomicU64,
    max_sessions: usize,
}

impl SharedState {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// Number of sessions with at least one subscriber
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Subscribers of `session`
    pub async fn connection_count(&self, session: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session)
            .map_or(0, |connections| connections.len())
    }

    fn next_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn join(
        &self,
        connection: ConnectionId,
        session: &str,
        tx: mpsc::Sender<Message>,
    ) -> Result<(), String> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session) && sessions.len() >= self.max_sessions {
            return Err(format!(
                "session limit of {} reached",
                self.max_sessions
            ));
        }
        sessions
            .entry(session.to_string())
            .or_default()
            .insert(connection, tx);
        Ok(())
    }

    async fn leave(&self, connection: ConnectionId, session: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(connections) = sessions.get_mut(session) {
            connections.remove(&connection);
            if connections.is_empty() {
                sessions.remove(session);
                debug!("Session {} is empty, dropped", session);
            }
        }
    }

    /// Send `text` to every subscriber of `session` except `from`
    async fn broadcast(&self, from: ConnectionId, session: &str, text: &str) -> usize {
        let sessions = self.sessions.read().await;
        let Some(connections) = sessions.get(session) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in connections.iter().filter(|(id, _)| **id != from) {
            match tx.try_send(Message::Text(text.to_string())) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Dropping broadcast to connection {} in session {}: {}",
                    id, session, e
                ),
            }
        }
        delivered
    }
}

/// Handle a single WebSocket connection until it closes
pub async fn handle_connection(stream: TcpStream, state: Arc<SharedState>) -> WsResult<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream).await?;
    let connection = state.next_id();
    info!("New relay connection {} from {}", connection, addr);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                debug!("Relay connection write failed: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut joined: Option<String> = None;
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_frame(&text, connection, &state, &mut joined, &tx).await;
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                info!("Relay connection {} closed by client", connection);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Relay connection {} error: {}", connection, e);
                break;
            }
        }
    }

    if let Some(session) = joined.take() {
        state.leave(connection, &session).await;
        info!("Connection {} left session {}", connection, session);
    }

    drop(tx);
    if let Err(e) = forward_task.await {
        error!("Relay writer task for connection {} failed: {}", connection, e);
    }
    Ok(())
}

async fn handle_frame(
    text: &str,
    connection: ConnectionId,
    state: &SharedState,
    joined: &mut Option<String>,
    tx: &mpsc::Sender<Message>,
) {
    let frame = match RelayFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Malformed frame from connection {}: {}", connection, e);
            reply(tx, RelayFrame::error(format!("malformed frame: {}", e))).await;
            return;
        }
    };

    match frame {
        RelayFrame::Join { session } => {
            if let Some(previous) = joined.take() {
                state.leave(connection, &previous).await;
            }
            match state.join(connection, &session, tx.clone()).await {
                Ok(()) => {
                    info!("Connection {} joined session {}", connection, session);
                    *joined = Some(session.clone());
                    reply(tx, RelayFrame::Joined { session }).await;
                }
                Err(reason) => {
                    warn!("Connection {} refused from session {}: {}", connection, session, reason);
                    reply(tx, RelayFrame::error(reason)).await;
                }
            }
        }
        RelayFrame::Broadcast { message } => {
            let Some(session) = joined.as_deref() else {
                reply(tx, RelayFrame::error("join a session before broadcasting")).await;
                return;
            };
            match (RelayFrame::Broadcast { message }).to_json() {
                Ok(json) => {
                    let delivered = state.broadcast(connection, session, &json).await;
                    debug!(
                        "Broadcast from connection {} reached {} peer(s) in {}",
                        connection, delivered, session
                    );
                }
                Err(e) => error!("Failed to encode broadcast: {}", e),
            }
        }
        RelayFrame::Leave => {
            if let Some(session) = joined.take() {
                state.leave(connection, &session).await;
                info!("Connection {} left session {}", connection, session);
            }
        }
        RelayFrame::Joined { .. } | RelayFrame::Error { .. } => {
            reply(tx, RelayFrame::error("unexpected server frame from client")).await;
        }
    }
}

async fn reply(tx: &mpsc::Sender<Message>, frame: RelayFrame) {
    match frame.to_json() {
        Ok(json) => {
            let _ = tx.send(Message::Text(json)).await;
        }
        Err(e) => error!("Failed to encode relay frame: {}", e),
    }
}
