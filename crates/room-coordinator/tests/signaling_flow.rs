//! End-to-end signaling flows driven through the room registry.
//!
//! These tests exercise the full connect → approve → ready → relay →
//! disconnect protocol across the registry, room, and connection
//! layers, observing exactly what each peer's connection would have
//! been sent.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use room_coordinator::actors::{
    ActorMetrics, ConnectionActorHandle, ConnectionMessage, RelayPayload, RoomRegistryHandle,
};
use serde_json::json;
use signal_protocol::ServerEvent;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

const ANNOUNCE: Duration = Duration::from_secs(2);
const GRACE: Duration = Duration::from_secs(5);

fn test_registry(id: &str) -> RoomRegistryHandle {
    RoomRegistryHandle::new(id.to_string(), ANNOUNCE, GRACE, ActorMetrics::new())
}

/// Drain every event currently queued for a test connection.
fn drain(rx: &mut Receiver<ConnectionMessage>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let ConnectionMessage::Deliver { event } = msg {
            events.push(event);
        }
    }
    events
}

#[tokio::test]
async fn test_host_guest_approval_promotion_flow() {
    let registry = test_registry("flow-1");

    // Host A connects with host intent to room "demo".
    let (a_conn, mut a_rx) = ConnectionActorHandle::for_test("a");
    let room = registry
        .connect(
            "demo".to_string(),
            "a".to_string(),
            "Ada".to_string(),
            true,
            a_conn,
        )
        .await
        .unwrap();

    let state = room.get_state().await.unwrap();
    assert_eq!(state.host_id.as_deref(), Some("a"));

    let a_events = drain(&mut a_rx);
    assert_eq!(
        a_events,
        vec![
            ServerEvent::Host { is_host: true },
            ServerEvent::JoinApproved,
            ServerEvent::Init { is_initiator: true },
            ServerEvent::Participants { count: 1 },
        ]
    );

    // Guest B connects without host intent.
    let (b_conn, mut b_rx) = ConnectionActorHandle::for_test("b");
    registry
        .connect(
            "demo".to_string(),
            "b".to_string(),
            "Bea".to_string(),
            false,
            b_conn,
        )
        .await
        .unwrap();
    let _ = room.get_state().await.unwrap();

    let b_events = drain(&mut b_rx);
    assert_eq!(b_events.first(), Some(&ServerEvent::Host { is_host: false }));
    assert!(b_events.contains(&ServerEvent::WaitingApproval));
    assert!(b_events.contains(&ServerEvent::Init {
        is_initiator: false
    }));

    let a_events = drain(&mut a_rx);
    assert!(a_events.contains(&ServerEvent::JoinRequest {
        id: "b".to_string(),
        name: "Bea".to_string(),
    }));

    // A approves B.
    room.approve_join("a".to_string(), "b".to_string())
        .await
        .unwrap();
    let _ = room.get_state().await.unwrap();

    assert!(drain(&mut b_rx).contains(&ServerEvent::JoinApproved));
    assert!(drain(&mut a_rx).contains(&ServerEvent::JoinRequestResolved {
        id: "b".to_string()
    }));

    // Both declare readiness; both receive the ready signal.
    room.call_ready("a".to_string(), true).await.unwrap();
    room.call_ready("b".to_string(), true).await.unwrap();
    let _ = room.get_state().await.unwrap();

    assert!(drain(&mut a_rx).contains(&ServerEvent::Ready));
    assert!(drain(&mut b_rx).contains(&ServerEvent::Ready));

    // A disconnects; B is promoted to host.
    registry
        .disconnect("demo".to_string(), "a".to_string())
        .await
        .unwrap();
    let state = room.get_state().await.unwrap();
    assert_eq!(state.host_id.as_deref(), Some("b"));

    let b_events = drain(&mut b_rx);
    assert!(b_events.contains(&ServerEvent::PromotedHost));
    assert!(b_events.contains(&ServerEvent::Host { is_host: true }));
    assert!(b_events.contains(&ServerEvent::PeerLeft));

    registry.cancel();
}

#[tokio::test]
async fn test_sole_participant_is_initiator_without_ready() {
    let registry = test_registry("flow-2");

    let (conn, mut rx) = ConnectionActorHandle::for_test("solo");
    let room = registry
        .connect(
            "lonely".to_string(),
            "solo".to_string(),
            "Sol".to_string(),
            false,
            conn,
        )
        .await
        .unwrap();

    room.call_ready("solo".to_string(), true).await.unwrap();
    let state = room.get_state().await.unwrap();

    let events = drain(&mut rx);
    assert!(events.contains(&ServerEvent::Init { is_initiator: true }));
    assert!(!events.contains(&ServerEvent::Ready));
    assert!(!state.announcing);
    assert!(!state.call_active);

    registry.cancel();
}

#[tokio::test]
async fn test_unapproved_guest_cannot_reach_other_members() {
    let registry = test_registry("flow-3");

    let (a_conn, mut a_rx) = ConnectionActorHandle::for_test("a");
    let room = registry
        .connect(
            "demo".to_string(),
            "a".to_string(),
            "Ada".to_string(),
            true,
            a_conn,
        )
        .await
        .unwrap();

    let (b_conn, mut b_rx) = ConnectionActorHandle::for_test("b");
    registry
        .connect(
            "demo".to_string(),
            "b".to_string(),
            "Bea".to_string(),
            false,
            b_conn,
        )
        .await
        .unwrap();
    let _ = room.get_state().await.unwrap();
    drain(&mut a_rx);
    drain(&mut b_rx);

    for payload in [
        RelayPayload::Offer(json!({"sdp": "x"})),
        RelayPayload::Answer(json!({"sdp": "y"})),
        RelayPayload::IceCandidate(json!({"candidate": "z"})),
    ] {
        room.relay("b".to_string(), payload).await.unwrap();
    }
    let state = room.get_state().await.unwrap();

    assert!(drain(&mut a_rx).is_empty());
    assert!(drain(&mut b_rx).is_empty());
    // An unapproved answer must not activate the call either.
    assert!(!state.call_active);

    registry.cancel();
}

#[tokio::test]
async fn test_active_call_survives_never_ready_peer_departure() {
    let registry = test_registry("flow-4");

    let (a_conn, _a_rx) = ConnectionActorHandle::for_test("a");
    let room = registry
        .connect(
            "demo".to_string(),
            "a".to_string(),
            "Ada".to_string(),
            true,
            a_conn,
        )
        .await
        .unwrap();
    let (b_conn, _b_rx) = ConnectionActorHandle::for_test("b");
    registry
        .connect(
            "demo".to_string(),
            "b".to_string(),
            "Bea".to_string(),
            false,
            b_conn,
        )
        .await
        .unwrap();
    let (c_conn, _c_rx) = ConnectionActorHandle::for_test("c");
    registry
        .connect(
            "demo".to_string(),
            "c".to_string(),
            "Cal".to_string(),
            false,
            c_conn,
        )
        .await
        .unwrap();

    room.approve_join("a".to_string(), "b".to_string())
        .await
        .unwrap();
    room.approve_join("a".to_string(), "c".to_string())
        .await
        .unwrap();
    room.call_ready("a".to_string(), true).await.unwrap();
    room.call_ready("b".to_string(), true).await.unwrap();
    room.relay("b".to_string(), RelayPayload::Answer(json!({"sdp": "v=0"})))
        .await
        .unwrap();

    let state = room.get_state().await.unwrap();
    assert!(state.call_active);

    // The never-ready member drops; the call stays active.
    registry
        .disconnect("demo".to_string(), "c".to_string())
        .await
        .unwrap();
    let state = room.get_state().await.unwrap();
    assert!(state.call_active);

    // A ready member dropping ends it.
    registry
        .disconnect("demo".to_string(), "b".to_string())
        .await
        .unwrap();
    let state = room.get_state().await.unwrap();
    assert!(!state.call_active);

    registry.cancel();
}

#[tokio::test]
async fn test_registry_mirrors_room_emptiness() {
    let registry = test_registry("flow-5");

    let (a_conn, _a_rx) = ConnectionActorHandle::for_test("a");
    registry
        .connect(
            "demo".to_string(),
            "a".to_string(),
            "Ada".to_string(),
            false,
            a_conn,
        )
        .await
        .unwrap();
    let (b_conn, _b_rx) = ConnectionActorHandle::for_test("b");
    registry
        .connect(
            "demo".to_string(),
            "b".to_string(),
            "Bea".to_string(),
            false,
            b_conn,
        )
        .await
        .unwrap();

    assert_eq!(registry.status().await.unwrap().room_count, 1);

    registry
        .disconnect("demo".to_string(), "a".to_string())
        .await
        .unwrap();
    assert_eq!(registry.status().await.unwrap().room_count, 1);

    registry
        .disconnect("demo".to_string(), "b".to_string())
        .await
        .unwrap();
    assert_eq!(registry.status().await.unwrap().room_count, 0);

    registry.cancel();
}

#[tokio::test]
async fn test_guest_ready_before_approval_counts_after_redeclare() {
    let registry = test_registry("flow-6");

    let (a_conn, mut a_rx) = ConnectionActorHandle::for_test("a");
    let room = registry
        .connect(
            "demo".to_string(),
            "a".to_string(),
            "Ada".to_string(),
            true,
            a_conn,
        )
        .await
        .unwrap();
    let (b_conn, mut b_rx) = ConnectionActorHandle::for_test("b");
    registry
        .connect(
            "demo".to_string(),
            "b".to_string(),
            "Bea".to_string(),
            false,
            b_conn,
        )
        .await
        .unwrap();

    // B declares ready while still pending: dropped.
    room.call_ready("b".to_string(), true).await.unwrap();
    room.call_ready("a".to_string(), true).await.unwrap();
    let _ = room.get_state().await.unwrap();
    drain(&mut a_rx);
    drain(&mut b_rx);

    room.approve_join("a".to_string(), "b".to_string())
        .await
        .unwrap();
    let state = room.get_state().await.unwrap();
    // Still no ready pair: B's pre-approval declaration did not stick.
    assert!(!state.announcing);

    // B re-declares after approval; now the pair is ready.
    room.call_ready("b".to_string(), true).await.unwrap();
    let state = room.get_state().await.unwrap();
    assert!(state.announcing);
    assert!(drain(&mut a_rx).contains(&ServerEvent::Ready));
    assert!(drain(&mut b_rx).contains(&ServerEvent::Ready));

    registry.cancel();
}
