//! Relay abstraction
//!
//! A relay is a session-scoped pub/sub bus with at-most-once, unordered
//! delivery. The manager joins it once per session and fans inbound messages
//! out to its PeerLinks; links only ever publish.

use super::SignalingMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long `leave` waits for the relay connection to say goodbye
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Publishing half of a relay subscription
#[async_trait]
pub trait RelayPublisher: Send + Sync {
    /// Hand a message to the relay. Success means accepted, not delivered.
    async fn publish(&self, message: SignalingMessage) -> Result<()>;
}

/// A relay that can be joined per session
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Subscribe to the channel of `session_id`
    async fn join(&self, session_id: &str) -> Result<RelaySubscription>;
}

/// A live subscription to one session channel
///
/// Dropping the subscription stops the background forwarding task.
pub struct RelaySubscription {
    session_id: String,
    publisher: Arc<dyn RelayPublisher>,
    inbound: mpsc::Receiver<SignalingMessage>,
    task: Option<JoinHandle<()>>,
    leave_tx: Option<oneshot::Sender<()>>,
}

impl RelaySubscription {
    pub fn new(
        session_id: impl Into<String>,
        publisher: Arc<dyn RelayPublisher>,
        inbound: mpsc::Receiver<SignalingMessage>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            publisher,
            inbound,
            task,
            leave_tx: None,
        }
    }

    /// Let `leave` ask the forwarding task to close the connection itself
    pub fn with_leave_signal(mut self, leave_tx: oneshot::Sender<()>) -> Self {
        self.leave_tx = Some(leave_tx);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn publisher(&self) -> Arc<dyn RelayPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Next inbound message, or `None` once the relay connection is gone
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.inbound.recv().await
    }

    /// Leave the session channel and wait for the forwarding task to stop
    ///
    /// A task with a leave signal gets to finish its goodbye; one without is
    /// aborted.
    pub async fn leave(mut self) {
        self.inbound.close();
        let Some(mut task) = self.task.take() else {
            return;
        };
        debug!("Leaving relay session {}", self.session_id);

        let signalled = self
            .leave_tx
            .take()
            .is_some_and(|leave_tx| leave_tx.send(()).is_ok());
        if !signalled {
            task.abort();
            let _ = task.await;
            return;
        }

        if tokio::time::timeout(LEAVE_TIMEOUT, &mut task).await.is_err() {
            warn!(
                "Relay session {} did not close within {:?}, aborting",
                self.session_id, LEAVE_TIMEOUT
            );
            task.abort();
        }
    }

    fn release(&mut self) {
        self.inbound.close();
        if let Some(task) = self.task.take() {
            debug!("Releasing relay subscription for session {}", self.session_id);
            task.abort();
        }
    }
}

impl Drop for RelaySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lets a plain channel stand in for a relay (useful to observe what a link sends)
#[async_trait]
impl RelayPublisher for mpsc::UnboundedSender<SignalingMessage> {
    async fn publish(&self, message: SignalingMessage) -> Result<()> {
        self.send(message)
            .map_err(|_| Error::Relay("publish channel closed".to_string()))
    }
}
