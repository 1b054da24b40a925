//! Per-link driver task
//!
//! Each PeerLink runs on its own task so a slow peer only stalls itself.
//! The task serializes the link's inputs and transport events, enforces the
//! connect deadline, and always closes the transport on the way out.

use super::link::{LinkSetup, PeerLink};
use super::state::{LinkRole, LinkState};
use crate::media::{MediaStream, MediaTrack};
use crate::signaling::SignalingMessage;
use crate::transport::{PeerTransportFactory, TransportEvent};
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Work handed from the manager to one link
#[derive(Debug)]
pub(crate) enum LinkInput {
    Signal(SignalingMessage),
    ReplaceTrack(MediaTrack),
}

/// Something a link tells the manager
#[derive(Debug)]
pub(crate) struct LinkReport {
    pub participant_id: String,
    /// Distinguishes a link from an earlier one to the same participant
    pub generation: u64,
    pub kind: LinkReportKind,
}

#[derive(Debug)]
pub(crate) enum LinkReportKind {
    StateChanged(LinkState),
    /// The polite side of an offer collision took over as responder
    RoleChanged(LinkRole),
    RemoteStream(MediaStream),
    /// Connect deadline passed without reaching Connected
    Unreachable { timeout_ms: u64 },
    Failed(String),
}

/// Manager-side handle to a running link task
pub(crate) struct LinkHandle {
    inputs: mpsc::UnboundedSender<LinkInput>,
    shutdown_tx: mpsc::Sender<()>,
}

impl LinkHandle {
    /// Queue an input. False if the link task has already exited.
    pub fn send(&self, input: LinkInput) -> bool {
        self.inputs.send(input).is_ok()
    }

    /// Ask the task to cancel in-flight work and close the transport
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

enum Step {
    Input(LinkInput),
    Transport(TransportEvent),
    Timeout,
    Shutdown,
}

enum Outcome {
    Done(Result<()>),
    Timeout,
    Shutdown,
}

/// Spawn the driver task for one link
pub(crate) fn spawn_link(
    setup: LinkSetup,
    transports: Arc<dyn PeerTransportFactory>,
    connect_timeout: Duration,
) -> (LinkHandle, JoinHandle<()>) {
    let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let task = tokio::spawn(run_link(
        setup,
        transports,
        connect_timeout,
        inputs_rx,
        shutdown_rx,
    ));

    (
        LinkHandle {
            inputs: inputs_tx,
            shutdown_tx,
        },
        task,
    )
}

/// Run `operation` unless shutdown or the connect deadline wins first
async fn cancellable<F>(
    operation: F,
    shutdown_rx: &mut mpsc::Receiver<()>,
    deadline: Option<Instant>,
) -> Outcome
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        biased;
        _ = shutdown_rx.recv() => Outcome::Shutdown,
        _ = sleep_until_opt(deadline) => Outcome::Timeout,
        result = operation => Outcome::Done(result),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_link(
    setup: LinkSetup,
    transports: Arc<dyn PeerTransportFactory>,
    connect_timeout: Duration,
    mut inputs: mpsc::UnboundedReceiver<LinkInput>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let participant_id = setup.remote_participant_id.clone();
    let generation = setup.generation;
    let reports = setup.reports.clone();
    let report = |kind: LinkReportKind| {
        let _ = reports.send(LinkReport {
            participant_id: participant_id.clone(),
            generation,
            kind,
        });
    };

    let deadline = Instant::now() + connect_timeout;
    let (events_tx, mut transport_events) = mpsc::unbounded_channel();

    let transport = tokio::select! {
        biased;
        _ = shutdown_rx.recv() => return,
        created = transports.create(&participant_id, events_tx) => match created {
            Ok(transport) => transport,
            Err(e) => {
                warn!(participant_id = %participant_id, "Failed to create transport: {}", e);
                report(LinkReportKind::Failed(e.to_string()));
                return;
            }
        },
    };

    let mut link = PeerLink::new(setup, transport);

    let mut outcome = match link.role() {
        LinkRole::Initiator => {
            cancellable(link.start_as_initiator(), &mut shutdown_rx, Some(deadline)).await
        }
        LinkRole::Responder => Outcome::Done(Ok(())),
    };

    loop {
        match outcome {
            Outcome::Done(Ok(())) => {}
            Outcome::Done(Err(e)) => {
                if e.is_peer_scoped() {
                    warn!(participant_id = %participant_id, "PeerLink failed: {}", e);
                } else {
                    error!(participant_id = %participant_id, "PeerLink failed: {}", e);
                }
                link.close().await;
                report(LinkReportKind::Failed(e.to_string()));
                return;
            }
            Outcome::Timeout => {
                let timeout_ms = connect_timeout.as_millis() as u64;
                let err = Error::PeerUnreachable {
                    participant_id: participant_id.clone(),
                    timeout_ms,
                };
                warn!(participant_id = %participant_id, "{}", err);
                link.close().await;
                report(LinkReportKind::Unreachable { timeout_ms });
                return;
            }
            Outcome::Shutdown => {
                debug!(participant_id = %participant_id, "PeerLink shutting down");
                link.close().await;
                return;
            }
        }

        let was_connected = link.ever_connected();
        let watch_deadline = (!was_connected).then_some(deadline);

        let step = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => Step::Shutdown,
            _ = sleep_until_opt(watch_deadline) => Step::Timeout,
            Some(event) = transport_events.recv() => Step::Transport(event),
            Some(input) = inputs.recv() => Step::Input(input),
        };

        outcome = match step {
            Step::Input(input) => {
                cancellable(link.handle_input(input), &mut shutdown_rx, watch_deadline).await
            }
            Step::Transport(event) => {
                cancellable(
                    link.on_transport_event(event),
                    &mut shutdown_rx,
                    watch_deadline,
                )
                .await
            }
            Step::Timeout => Outcome::Timeout,
            Step::Shutdown => Outcome::Shutdown,
        };

        if !was_connected && link.ever_connected() {
            info!(participant_id = %participant_id, "PeerLink connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::OutgoingTrackSet;
    use crate::peer::{LinkRole, LocalParticipant};
    use crate::transport::mock::{MockBehavior, MockTransportFactory};
    use crate::transport::SessionDescription;

    fn setup(
        role: LinkRole,
        reports: mpsc::UnboundedSender<LinkReport>,
    ) -> (LinkSetup, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (publish_tx, sent) = mpsc::unbounded_channel();
        (
            LinkSetup {
                local: Arc::new(LocalParticipant::new("s", "a", "user-a", "A")),
                remote_participant_id: "b".to_string(),
                remote_user_id: "user-b".to_string(),
                role,
                generation: 7,
                outgoing: OutgoingTrackSet::default(),
                publisher: Arc::new(publish_tx),
                reports,
            },
            sent,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_offer_reports_unreachable() {
        let factory = Arc::new(MockTransportFactory::new());
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let (setup, _sent) = setup(LinkRole::Initiator, reports_tx);

        let (_handle, task) = spawn_link(setup, factory.clone(), Duration::from_secs(30));
        task.await.unwrap();

        let last = std::iter::from_fn(|| reports.try_recv().ok()).last().unwrap();
        assert_eq!(last.generation, 7);
        assert!(matches!(
            last.kind,
            LinkReportKind::Unreachable { timeout_ms: 30_000 }
        ));
        assert!(factory.transport_for("b").unwrap().record().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_link_outlives_deadline() {
        let factory = Arc::new(MockTransportFactory::new());
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let (setup, _sent) = setup(LinkRole::Responder, reports_tx);

        let (handle, task) = spawn_link(setup, factory.clone(), Duration::from_secs(30));
        assert!(handle.send(LinkInput::Signal(SignalingMessage::Offer(
            crate::signaling::SignalEnvelope {
                from_participant_id: "b".to_string(),
                from_user_id: "user-b".to_string(),
                to_user_id: "user-a".to_string(),
                to_participant_id: Some("a".to_string()),
                data: SessionDescription::offer("v=0"),
            }
        ))));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!task.is_finished());

        let states: Vec<LinkState> = std::iter::from_fn(|| reports.try_recv().ok())
            .filter_map(|r| match r.kind {
                LinkReportKind::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states.last(), Some(&LinkState::Connected));

        handle.shutdown();
        task.await.unwrap();
        assert!(factory.transport_for("b").unwrap().record().closed);
    }

    #[tokio::test]
    async fn test_transport_failure_reports_failed() {
        let factory = Arc::new(MockTransportFactory::with_behavior(MockBehavior {
            reject_remote_description: true,
            ..Default::default()
        }));
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let (setup, _sent) = setup(LinkRole::Initiator, reports_tx);

        let (handle, task) = spawn_link(setup, factory, Duration::from_secs(30));
        handle.send(LinkInput::Signal(SignalingMessage::Answer(
            crate::signaling::SignalEnvelope {
                from_participant_id: "b".to_string(),
                from_user_id: "user-b".to_string(),
                to_user_id: "user-a".to_string(),
                to_participant_id: Some("a".to_string()),
                data: SessionDescription::answer("v=0"),
            },
        )));
        task.await.unwrap();

        let last = std::iter::from_fn(|| reports.try_recv().ok()).last().unwrap();
        assert!(matches!(last.kind, LinkReportKind::Failed(_)));
    }
}
