// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use caseline_kernel::cases::InMemoryCaseDirectory;
use caseline_kernel::sync::Principal;
use caseline_kernel::types::{CaseId, EventId};
use caseline_node::config::NodeConfig;
use caseline_node::realtime::{ConnectionRegistry, OpenError, Outbound, PendingConnection};
use common::{call, harness, PATIENT};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn registry() -> ConnectionRegistry {
    ConnectionRegistry::new(Duration::from_millis(100))
}

fn text(frame: Outbound) -> Value {
    match frame {
        Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_connection_of_the_case() {
    let registry = registry();
    let case = CaseId::new_v4();
    let other = CaseId::new_v4();

    let (a, mut rx_a) = PendingConnection::channel(8);
    let (b, mut rx_b) = PendingConnection::channel(8);
    let (c, mut rx_c) = PendingConnection::channel(8);
    registry.register(case, a);
    registry.register(case, b);
    registry.register(other, c);
    assert_eq!(registry.connection_count(case), 2);

    let delivered = registry.broadcast(case, Arc::from("{\"n\":1}")).await;
    assert_eq!(delivered, 2);
    assert_eq!(text(rx_a.recv().await.unwrap()), json!({"n": 1}));
    assert_eq!(text(rx_b.recv().await.unwrap()), json!({"n": 1}));
    assert!(rx_c.try_recv().is_err());
}

#[tokio::test]
async fn test_gone_connections_are_removed_on_broadcast() {
    let registry = registry();
    let case = CaseId::new_v4();

    let (alive, mut rx_alive) = PendingConnection::channel(8);
    let (dead, rx_dead) = PendingConnection::channel(8);
    let alive_id = registry.register(case, alive);
    let dead_id = registry.register(case, dead);
    drop(rx_dead);

    assert_eq!(registry.broadcast(case, Arc::from("{}")).await, 1);
    assert!(registry.is_registered(alive_id));
    assert!(!registry.is_registered(dead_id));
    assert!(rx_alive.recv().await.is_some());
}

#[tokio::test]
async fn test_slow_consumer_times_out_without_blocking_others() {
    let registry = registry();
    let case = CaseId::new_v4();

    let (slow, _rx_slow) = PendingConnection::channel(1);
    let (fast, mut rx_fast) = PendingConnection::channel(8);
    let slow_id = registry.register(case, slow);
    registry.register(case, fast);

    assert_eq!(registry.broadcast(case, Arc::from("{\"n\":1}")).await, 2);
    // Slow buffer is now full
    let delivered = timeout(Duration::from_secs(1), registry.broadcast(case, Arc::from("{\"n\":2}")))
        .await
        .unwrap();
    assert_eq!(delivered, 1);
    assert!(!registry.is_registered(slow_id));

    assert_eq!(text(rx_fast.recv().await.unwrap()), json!({"n": 1}));
    assert_eq!(text(rx_fast.recv().await.unwrap()), json!({"n": 2}));
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let registry = registry();
    let case = CaseId::new_v4();
    let (pending, mut rx) = PendingConnection::channel(8);
    let id = registry.register(case, pending);

    assert!(registry.unregister(case, id));
    assert!(!registry.unregister(case, id));
    assert_eq!(registry.connection_count(case), 0);
    // Registry held the only sender
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_send_direct_swallows_failures() {
    let registry = registry();
    let case = CaseId::new_v4();
    let (pending, rx) = PendingConnection::channel(8);
    let id = registry.register(case, pending);

    drop(rx);
    assert!(!registry.send_direct(case, id, Outbound::Ping).await);

    let (pending, mut rx) = PendingConnection::channel(8);
    let id = registry.register(case, pending);
    assert!(registry.send_direct(case, id, Outbound::Ping).await);
    assert_eq!(rx.recv().await, Some(Outbound::Ping));
    assert!(!registry.send_direct(CaseId::new_v4(), id, Outbound::Ping).await);
}

#[tokio::test]
async fn test_close_case_drains_connections() {
    let registry = registry();
    let case = CaseId::new_v4();
    let (pending, mut rx) = PendingConnection::channel(8);
    registry.register(case, pending);

    assert_eq!(registry.close_case(case), 1);
    assert_eq!(registry.connection_count(case), 0);
    match rx.recv().await {
        Some(Outbound::Close { code, reason }) => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "case_closed");
        }
        other => panic!("expected close frame, got {:?}", other),
    }
    assert!(rx.recv().await.is_none());
    assert_eq!(registry.close_case(case), 0);
}

#[tokio::test]
async fn test_shutdown_drains_everything() {
    let registry = registry();
    let (a, _rx_a) = PendingConnection::channel(8);
    let (b, _rx_b) = PendingConnection::channel(8);
    registry.register(CaseId::new_v4(), a);
    registry.register(CaseId::new_v4(), b);

    assert_eq!(registry.shutdown(), 2);
    assert_eq!(registry.total_connections(), 0);
}

#[tokio::test]
async fn test_open_checks_case_and_scope() {
    let registry = registry();
    let cases = InMemoryCaseDirectory::new();
    let case = cases.create();

    let (pending, _rx) = PendingConnection::channel(8);
    let err = registry.open(&cases, &Principal::Case(CaseId::new_v4()), case, pending);
    assert_eq!(err.err(), Some(OpenError::Forbidden));

    let (pending, _rx) = PendingConnection::channel(8);
    let err = registry.open(&cases, &Principal::Administrator, CaseId::new_v4(), pending);
    assert_eq!(err.err(), Some(OpenError::CaseNotFound));

    let (pending, _rx) = PendingConnection::channel(8);
    let id = registry.open(&cases, &Principal::Case(case), case, pending).unwrap();
    assert!(registry.is_registered(id));
}

#[tokio::test]
async fn test_synced_events_are_pushed_to_observers() {
    let h = harness(NodeConfig::default());
    let (pending, mut rx) = PendingConnection::channel(8);
    h.state
        .registry
        .open(h.cases.as_ref(), &Principal::Administrator, h.case, pending)
        .unwrap();

    let id = EventId::new_v4();
    let body = json!({"events": [{"event_id": id, "type": "contraction_start", "ts": "2025-03-01T10:15:00Z"}]});
    call(&h.app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body.clone())).await;

    let frame = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    let frame = text(frame);
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["case_id"], json!(h.case));
    assert_eq!(frame["event"]["event_id"], json!(id));
    assert_eq!(frame["event"]["track"], "labor");

    // Replays are not pushed again
    call(&h.app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body)).await;
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
}
