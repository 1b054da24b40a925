//! Multi-participant mesh scenarios
//!
//! Several managers share one in-process relay; the harness plays roster
//! store. Covers join order, dedup, participant-level addressing and the
//! handling of late messages after teardown.

mod harness;

use harness::{
    init_test_tracing, wait_until, HarnessResult, MeshHarness, TestParticipant, SESSION_ID,
    WAIT_TIMEOUT,
};
use meetmesh_core::signaling::{SignalEnvelope, SignalingMessage};
use meetmesh_core::transport::{IceCandidate, SessionDescription};
use meetmesh_core::{LinkRole, MeshEvent, ParticipantRef};
use std::time::Duration;
use tracing::info;

fn envelope<T>(from: &str, from_user: &str, to_user: &str, data: T) -> SignalEnvelope<T> {
    SignalEnvelope {
        from_participant_id: from.to_string(),
        from_user_id: from_user.to_string(),
        to_user_id: to_user.to_string(),
        to_participant_id: None,
        data,
    }
}

/// A, B, C join in order: A sends no offers, B one, C two, every pair connects once
#[tokio::test]
async fn test_three_participants_join_in_order() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let a = mesh.join("a", "user-a").await?;
    let b = mesh.join("b", "user-b").await?;
    b.wait_connected_to(&["a"]).await?;
    let c = mesh.join("c", "user-c").await?;

    a.wait_connected_to(&["b", "c"]).await?;
    b.wait_connected_to(&["a", "c"]).await?;
    c.wait_connected_to(&["a", "b"]).await?;

    assert_eq!(a.transports.offers_created(), 0);
    assert_eq!(b.transports.offers_created(), 1);
    assert_eq!(c.transports.offers_created(), 2);

    // One transport per pair on each side
    assert_eq!(a.transports.transports().len(), 2);
    assert_eq!(b.transports.transports().len(), 2);
    assert_eq!(c.transports.transports().len(), 2);

    let a_links = a.links().await?;
    assert!(a_links.iter().all(|l| l.role == LinkRole::Responder));
    let c_links = c.links().await?;
    assert!(c_links.iter().all(|l| l.role == LinkRole::Initiator));

    info!("Mesh of three connected");
    mesh.shutdown().await;
    Ok(())
}

/// Two participants take the same first snapshot, so both start as
/// initiator. The smaller participant id yields and each side ends up with
/// one link.
#[tokio::test]
async fn test_simultaneous_join_connects_pair_once() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let a = mesh.join_unannounced("a", "user-a").await?;
    let b = mesh.join_unannounced("b", "user-b").await?;
    mesh.publish_roster().await?;

    a.wait_connected_to(&["b"]).await?;
    b.wait_connected_to(&["a"]).await?;

    assert_eq!(a.transports.transports().len(), 1);
    assert_eq!(b.transports.transports().len(), 1);

    let a_record = a.transport_for("b").expect("transport to b").record();
    let b_record = b.transport_for("a").expect("transport to a").record();
    assert_eq!(b_record.rollbacks, 0);
    assert!(a_record.rollbacks <= 1);
    assert_eq!(a_record.answers_created, 1);
    assert_eq!(b_record.answers_created, 0);
    assert_eq!(b_record.offers_created, 1);

    let a_links = a.links().await?;
    assert_eq!(a_links[0].role, LinkRole::Responder);
    let b_links = b.links().await?;
    assert_eq!(b_links[0].role, LinkRole::Initiator);

    mesh.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_repeated_snapshots_never_duplicate_links() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let a = mesh.join("a", "user-a").await?;
    let b = mesh.join("b", "user-b").await?;
    b.wait_connected_to(&["a"]).await?;

    let roster = vec![
        ParticipantRef::new("a", "user-a", "A"),
        ParticipantRef::new("b", "user-b", "B"),
    ];
    for _ in 0..5 {
        a.handle.roster_snapshot(roster.clone()).await?;
        b.handle.roster_snapshot(roster.clone()).await?;
        b.handle
            .participant_joined(ParticipantRef::new("a", "user-a", "A"))
            .await?;
    }

    assert_eq!(a.link_ids().await?, vec!["b"]);
    assert_eq!(b.link_ids().await?, vec!["a"]);
    assert_eq!(a.transports.transports().len(), 1);
    assert_eq!(b.transports.transports().len(), 1);
    assert_eq!(b.transports.offers_created(), 1);

    mesh.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_remote_streams_are_reported() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let mut a = mesh.join("a", "user-a").await?;
    let _b = mesh.join("b", "user-b").await?;

    let event = a
        .next_event("remote stream from b", |e| {
            matches!(e, MeshEvent::RemoteStream { stream, .. } if stream.tracks().len() == 2)
        })
        .await?;
    match event {
        MeshEvent::RemoteStream {
            participant_id,
            user_id,
            ..
        } => {
            assert_eq!(participant_id, "b");
            assert_eq!(user_id, "user-b");
        }
        other => panic!("unexpected event {:?}", other),
    }

    mesh.shutdown().await;
    Ok(())
}

/// Two tabs of one user are distinct participants and each gets its own link
#[tokio::test]
async fn test_tabs_of_same_user_are_routed_by_participant() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let tab1 = mesh.join("a-tab1", "user-a").await?;
    let tab2 = mesh.join("a-tab2", "user-a").await?;
    let b = mesh.join("b", "user-b").await?;

    b.wait_connected_to(&["a-tab1", "a-tab2"]).await?;
    tab1.wait_connected_to(&["a-tab2", "b"]).await?;
    tab2.wait_connected_to(&["a-tab1", "b"]).await?;

    // Each tab answered only the offer meant for it
    for tab in [&tab1, &tab2] {
        let record = tab.transport_for("b").expect("transport to b").record();
        assert_eq!(record.answers_created, 1);
    }

    mesh.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_late_answer_after_leave_is_noop() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let mut a = mesh.join("a", "user-a").await?;
    let _b = mesh.join("b", "user-b").await?;
    a.wait_connected_to(&["b"]).await?;

    a.handle.participant_left("b").await?;
    assert!(a.link_ids().await?.is_empty());
    let transport = a.transport_for("b").unwrap();
    wait_until("transport to b closed", WAIT_TIMEOUT, || {
        let closed = transport.record().closed;
        async move { closed }
    })
    .await?;
    // Idempotent
    a.handle.participant_left("b").await?;
    a.drain_events();

    mesh.relay.inject(
        SESSION_ID,
        SignalingMessage::Answer(envelope(
            "b",
            "user-b",
            "user-a",
            SessionDescription::answer("v=0 late"),
        )),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(a.link_ids().await?.is_empty());
    assert_eq!(a.transports.transports().len(), 1);
    assert!(a
        .drain_events()
        .iter()
        .all(|e| !matches!(e, MeshEvent::PeerFailed { .. })));

    mesh.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_candidate_with_stale_participant_is_dropped() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let mut a = mesh.join("a", "user-a").await?;
    let b = mesh.join("b", "user-b").await?;
    a.wait_connected_to(&["b"]).await?;

    // b reloads: the old participant leaves the roster
    mesh.leave(&b).await?;
    wait_links_empty(&a).await?;
    a.drain_events();

    mesh.relay.inject(
        SESSION_ID,
        SignalingMessage::IceCandidate(envelope(
            "b",
            "user-b",
            "user-a",
            IceCandidate::new("candidate:9 1 udp 1 10.0.0.9 9 typ host", None, Some(0)),
        )),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(a.link_ids().await?.is_empty());
    assert_eq!(a.transports.transports().len(), 1);
    assert!(a.drain_events().is_empty());

    // The same user rejoins with a fresh participant id and connects normally
    let b2 = mesh.join("b-2", "user-b").await?;
    a.wait_connected_to(&["b-2"]).await?;
    b2.wait_connected_to(&["a"]).await?;

    mesh.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_offer_from_departed_participant_is_dropped() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let a = mesh.join("a", "user-a").await?;
    a.handle
        .roster_snapshot(vec![
            ParticipantRef::new("a", "user-a", "A"),
            ParticipantRef::new("z", "user-z", "Z"),
        ])
        .await?;
    a.handle
        .roster_snapshot(vec![ParticipantRef::new("a", "user-a", "A")])
        .await?;

    mesh.relay.inject(
        SESSION_ID,
        SignalingMessage::Offer(envelope(
            "z",
            "user-z",
            "user-a",
            SessionDescription::offer("v=0 stale"),
        )),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(a.link_ids().await?.is_empty());
    assert!(a.transports.transports().is_empty());

    mesh.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_messages_for_other_users_are_ignored() -> HarnessResult<()> {
    init_test_tracing();
    let mut mesh = MeshHarness::new();

    let a = mesh.join("a", "user-a").await?;
    mesh.relay.inject(
        SESSION_ID,
        SignalingMessage::Offer(envelope(
            "x",
            "user-x",
            "user-y",
            SessionDescription::offer("v=0"),
        )),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(a.link_ids().await?.is_empty());
    mesh.shutdown().await;
    Ok(())
}

async fn wait_links_empty(participant: &TestParticipant) -> HarnessResult<()> {
    let handle = participant.handle.clone();
    wait_until("links to drain", WAIT_TIMEOUT, || {
        let handle = handle.clone();
        async move { handle.links().await.map(|l| l.is_empty()).unwrap_or(false) }
    })
    .await
}
