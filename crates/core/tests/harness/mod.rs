//! Shared harness for multi-participant mesh tests
//!
//! Runs several [`PeerConnectionManager`]s against one in-process relay with
//! mock transports, and plays the role of the roster store: every join or
//! leave publishes a fresh snapshot to each running participant.

#![allow(dead_code)]

use meetmesh_core::media::SyntheticCaptureSource;
use meetmesh_core::signaling::LocalRelay;
use meetmesh_core::transport::mock::{MockBehavior, MockTransport, MockTransportFactory};
use meetmesh_core::{
    LinkState, LinkSummary, LocalParticipant, ManagerHandle, MeshConfig, MeshEvent,
    ParticipantRef, PeerConnectionManager,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub const SESSION_ID: &str = "session-1";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Mesh(#[from] meetmesh_core::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,meetmesh_core=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_until<F, Fut>(
    what: &str,
    timeout: Duration,
    mut check: F,
) -> HarnessResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::Timeout(what.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// One running participant
pub struct TestParticipant {
    pub local: LocalParticipant,
    pub handle: ManagerHandle,
    pub events: mpsc::UnboundedReceiver<MeshEvent>,
    pub transports: Arc<MockTransportFactory>,
    pub capture: Arc<SyntheticCaptureSource>,
}

impl TestParticipant {
    pub fn id(&self) -> &str {
        &self.local.participant_id
    }

    pub async fn links(&self) -> HarnessResult<Vec<LinkSummary>> {
        Ok(self.handle.links().await?)
    }

    pub async fn link_ids(&self) -> HarnessResult<Vec<String>> {
        Ok(self
            .links()
            .await?
            .into_iter()
            .map(|l| l.participant_id)
            .collect())
    }

    /// Latest transport created toward `remote`
    pub fn transport_for(&self, remote: &str) -> Option<Arc<MockTransport>> {
        self.transports.transport_for(remote)
    }

    /// Wait until links to exactly `remotes` exist and are all Connected
    pub async fn wait_connected_to(&self, remotes: &[&str]) -> HarnessResult<()> {
        let mut expected: Vec<String> = remotes.iter().map(|r| r.to_string()).collect();
        expected.sort();
        let handle = self.handle.clone();
        wait_until(
            &format!("{} connected to {:?}", self.id(), expected),
            WAIT_TIMEOUT,
            || {
                let handle = handle.clone();
                let expected = expected.clone();
                async move {
                    match handle.links().await {
                        Ok(links) => {
                            links.len() == expected.len()
                                && links.iter().zip(&expected).all(|(link, id)| {
                                    &link.participant_id == id
                                        && link.state == LinkState::Connected
                                })
                        }
                        Err(_) => false,
                    }
                }
            },
        )
        .await
    }

    /// Next event matching `predicate`, skipping others
    pub async fn next_event<P>(
        &mut self,
        what: &str,
        mut predicate: P,
    ) -> HarnessResult<MeshEvent>
    where
        P: FnMut(&MeshEvent) -> bool,
    {
        let wait = async {
            while let Some(event) = self.events.recv().await {
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        };
        match tokio::time::timeout(WAIT_TIMEOUT, wait).await {
            Ok(Some(event)) => Ok(event),
            _ => Err(HarnessError::Timeout(what.to_string())),
        }
    }

    /// Every event received so far
    pub fn drain_events(&mut self) -> Vec<MeshEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

/// Session with an in-process relay and a scripted roster
pub struct MeshHarness {
    pub relay: Arc<LocalRelay>,
    config: MeshConfig,
    roster: Vec<ParticipantRef>,
    handles: Vec<(String, ManagerHandle)>,
}

impl MeshHarness {
    pub fn new() -> Self {
        Self {
            relay: Arc::new(LocalRelay::default()),
            config: MeshConfig::default(),
            roster: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    /// Join a participant with default mock transports
    pub async fn join(
        &mut self,
        participant_id: &str,
        user_id: &str,
    ) -> HarnessResult<TestParticipant> {
        self.join_with_behavior(participant_id, user_id, MockBehavior::default())
            .await
    }

    /// Join a participant and publish the new roster to everyone, newcomer first
    pub async fn join_with_behavior(
        &mut self,
        participant_id: &str,
        user_id: &str,
        behavior: MockBehavior,
    ) -> HarnessResult<TestParticipant> {
        let participant = self.spawn(participant_id, user_id, behavior).await?;
        let handle = participant.handle.clone();

        self.roster.push(participant.local.to_participant_ref());
        handle.roster_snapshot(self.roster.clone()).await?;
        for (_, existing) in &self.handles {
            existing.roster_snapshot(self.roster.clone()).await?;
        }
        self.handles.push((participant_id.to_string(), handle));
        Ok(participant)
    }

    /// Start a participant and add it to the roster without publishing it.
    /// Use [`publish_roster`](Self::publish_roster) to announce a batch.
    pub async fn join_unannounced(
        &mut self,
        participant_id: &str,
        user_id: &str,
    ) -> HarnessResult<TestParticipant> {
        let participant = self
            .spawn(participant_id, user_id, MockBehavior::default())
            .await?;
        self.roster.push(participant.local.to_participant_ref());
        self.handles
            .push((participant_id.to_string(), participant.handle.clone()));
        Ok(participant)
    }

    /// Send the current roster to every running participant
    pub async fn publish_roster(&self) -> HarnessResult<()> {
        for (_, handle) in &self.handles {
            handle.roster_snapshot(self.roster.clone()).await?;
        }
        Ok(())
    }

    async fn spawn(
        &self,
        participant_id: &str,
        user_id: &str,
        behavior: MockBehavior,
    ) -> HarnessResult<TestParticipant> {
        let local = LocalParticipant::new(
            SESSION_ID,
            participant_id,
            user_id,
            participant_id.to_uppercase(),
        );
        let transports = Arc::new(MockTransportFactory::with_behavior(behavior));
        let capture = Arc::new(SyntheticCaptureSource::new());

        let (handle, events) = PeerConnectionManager::spawn(
            self.config.clone(),
            local.clone(),
            self.relay.as_ref(),
            transports.clone(),
            capture.clone(),
        )
        .await?;

        Ok(TestParticipant {
            local,
            handle,
            events,
            transports,
            capture,
        })
    }

    /// List a participant in the roster without running a manager for it
    pub fn add_ghost(&mut self, participant_id: &str, user_id: &str) {
        self.roster
            .push(ParticipantRef::new(participant_id, user_id, "ghost"));
    }

    /// Shut a participant down and publish the roster without it
    pub async fn leave(&mut self, participant: &TestParticipant) -> HarnessResult<()> {
        participant.handle.shutdown().await;
        self.roster
            .retain(|p| p.participant_id != participant.local.participant_id);
        self.handles
            .retain(|(id, _)| id != &participant.local.participant_id);
        for (_, handle) in &self.handles {
            handle.roster_snapshot(self.roster.clone()).await?;
        }
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.relay.subscriber_count(SESSION_ID)
    }

    pub async fn shutdown(&mut self) {
        for (_, handle) in self.handles.drain(..) {
            handle.shutdown().await;
        }
    }
}
