//! In-process relay
//!
//! Session-scoped broadcast bus for participants living in one process
//! (simulations, tests, single-host deployments). Publishers never receive
//! their own messages. A subscriber that falls behind loses messages rather
//! than stalling the session, matching the at-most-once contract.

use super::relay::{RelayPublisher, RelaySubscription, SignalingRelay};
use super::SignalingMessage;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Default per-session buffer
pub const DEFAULT_RELAY_CAPACITY: usize = 1024;

/// Origin id used by [`LocalRelay::inject`]
const EXTERNAL_ORIGIN: u64 = 0;

#[derive(Debug, Clone)]
struct Published {
    origin: u64,
    message: SignalingMessage,
}

/// In-process [`SignalingRelay`]
pub struct LocalRelay {
    sessions: Mutex<HashMap<String, broadcast::Sender<Published>>>,
    next_subscriber: AtomicU64,
    capacity: usize,
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_CAPACITY)
    }
}

impl LocalRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(EXTERNAL_ORIGIN + 1),
            capacity,
        }
    }

    fn channel(&self, session_id: &str) -> broadcast::Sender<Published> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Deliver a message to every subscriber of `session_id`, as if sent by
    /// a participant outside this process. Returns the number of receivers.
    pub fn inject(&self, session_id: &str, message: SignalingMessage) -> usize {
        self.channel(session_id)
            .send(Published {
                origin: EXTERNAL_ORIGIN,
                message,
            })
            .unwrap_or(0)
    }

    /// Live subscriptions on `session_id`
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

struct LocalPublisher {
    origin: u64,
    session_id: String,
    sender: broadcast::Sender<Published>,
}

#[async_trait]
impl RelayPublisher for LocalPublisher {
    async fn publish(&self, message: SignalingMessage) -> Result<()> {
        let kind = message.kind();
        if self
            .sender
            .send(Published {
                origin: self.origin,
                message,
            })
            .is_err()
        {
            debug!(
                "No subscribers on session {}, {} dropped",
                self.session_id, kind
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingRelay for LocalRelay {
    async fn join(&self, session_id: &str) -> Result<RelaySubscription> {
        let sender = self.channel(session_id);
        let mut rx = sender.subscribe();
        let origin = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, inbound) = mpsc::channel(self.capacity);

        let session = session_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(published) => {
                        if published.origin == origin {
                            continue;
                        }
                        if tx.send(published.message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Relay subscriber {} on session {} lagged, {} messages lost",
                            origin, session, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Relay subscriber {} left session {}", origin, session);
        });

        debug!("Subscriber {} joined session {}", origin, session_id);

        let publisher = Arc::new(LocalPublisher {
            origin,
            session_id: session_id.to_string(),
            sender,
        });

        Ok(RelaySubscription::new(
            session_id,
            publisher,
            inbound,
            Some(task),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SignalEnvelope;
    use crate::transport::SessionDescription;
    use std::time::Duration;

    fn offer(from: &str, to: &str) -> SignalingMessage {
        SignalingMessage::Offer(SignalEnvelope {
            from_participant_id: from.to_string(),
            from_user_id: format!("user-{}", from),
            to_user_id: format!("user-{}", to),
            to_participant_id: None,
            data: SessionDescription::offer("v=0"),
        })
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let relay = LocalRelay::default();
        let mut a = relay.join("s1").await.unwrap();
        let mut b = relay.join("s1").await.unwrap();

        a.publisher().publish(offer("a", "b")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.from_participant_id(), "a");

        // Sender does not see its own message
        assert!(tokio::time::timeout(Duration::from_millis(50), a.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let relay = LocalRelay::default();
        let a = relay.join("s1").await.unwrap();
        let mut other = relay.join("s2").await.unwrap();

        a.publisher().publish(offer("a", "b")).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), other.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_inject_reaches_everyone() {
        let relay = LocalRelay::default();
        let mut a = relay.join("s1").await.unwrap();
        let mut b = relay.join("s1").await.unwrap();

        assert_eq!(relay.inject("s1", offer("x", "a")), 2);
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_leave_releases_subscriber() {
        let relay = LocalRelay::default();
        let sub = relay.join("s1").await.unwrap();
        assert_eq!(relay.subscriber_count("s1"), 1);

        sub.leave().await;
        assert_eq!(relay.subscriber_count("s1"), 0);
    }
}
