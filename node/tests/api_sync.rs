// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use axum::http::StatusCode;
use caseline_kernel::sync::ClosedCasePolicy;
use caseline_kernel::types::{CaseId, EventId};
use caseline_node::config::NodeConfig;
use caseline_node::server::build_router;
use caseline_node::state::AppState;
use common::{call, harness, ADMIN, OTHER_PATIENT, PATIENT};
use serde_json::{json, Value};
use tempfile::tempdir;

fn event(id: EventId, kind: &str) -> Value {
    json!({
        "event_id": id,
        "type": kind,
        "ts": "2025-03-01T10:15:00.123456Z",
        "payload": {"note": "hello"}
    })
}

#[tokio::test]
async fn test_sync_requires_bearer_token() {
    let h = harness(NodeConfig::default());
    let body = json!({"events": []});

    let (status, resp) = call(&h.app, "POST", "/api/v1/events/sync", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp, json!({"error": "unauthorized"}));

    let (status, _) = call(&h.app, "POST", "/api/v1/events/sync", Some("nope"), Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sync_accepts_and_replays_idempotently() {
    let h = harness(NodeConfig::default());
    let id = EventId::new_v4();
    let body = json!({"cursor": null, "events": [event(id, "contraction_start")]});

    let (status, first) = call(&h.app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["accepted_event_ids"], json!([id]));
    assert_eq!(first["rejected"], json!([]));
    assert_eq!(first["server_cursor"], json!("1"));

    let stored = &first["new_events"][0];
    assert_eq!(stored["type"], "contraction_start");
    assert_eq!(stored["track"], "labor");
    assert_eq!(stored["source"], "woman");
    assert_eq!(stored["payload_v"], 1);
    assert_eq!(stored["case_id"], json!(h.case));
    assert!(stored["server_ts"].is_string());

    let (status, second) = call(&h.app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["accepted_event_ids"], json!([id]));
    assert_eq!(second["new_events"][0], *stored);
    assert_eq!(h.state.processor.log().len(), 1);
}

#[tokio::test]
async fn test_sync_rejects_foreign_case_per_event() {
    let h = harness(NodeConfig::default());
    let mut foreign = event(EventId::new_v4(), "note");
    foreign["case_id"] = json!(h.other_case);
    let own = EventId::new_v4();

    let body = json!({"events": [foreign, event(own, "note")]});
    let (status, resp) = call(&h.app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["accepted_event_ids"], json!([own]));
    assert_eq!(resp["rejected"][0]["reason"], "case_scope_violation");
}

#[tokio::test]
async fn test_sync_request_level_errors() {
    let h = harness(NodeConfig::default());

    let (status, resp) = call(
        &h.app,
        "POST",
        "/api/v1/events/sync",
        Some(PATIENT),
        Some(json!({"cursor": "abc", "events": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], "invalid_cursor");

    let (status, resp) = call(&h.app, "POST", "/api/v1/events/sync", Some(ADMIN), Some(json!({"events": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], "case_id_required");

    let (status, resp) = call(
        &h.app,
        "POST",
        "/api/v1/events/sync",
        Some(OTHER_PATIENT),
        Some(json!({"case_id": h.case, "events": []})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(resp["error"], "forbidden");

    let (status, resp) = call(
        &h.app,
        "POST",
        "/api/v1/events/sync",
        Some(PATIENT),
        Some(json!({"events": [{"type": "note"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], "invalid_body");

    let (status, resp) = call(
        &h.app,
        "POST",
        "/api/v1/events/sync",
        Some(ADMIN),
        Some(json!({"case_id": CaseId::new_v4(), "events": []})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(resp["error"], "case_not_found");
}

#[tokio::test]
async fn test_admin_sync_is_stamped_midwife() {
    let h = harness(NodeConfig::default());
    let body = json!({"case_id": h.case, "events": [event(EventId::new_v4(), "visit_task")]});

    let (status, resp) = call(&h.app, "POST", "/api/v1/events/sync", Some(ADMIN), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["new_events"][0]["source"], "midwife");
    assert_eq!(resp["new_events"][0]["track"], "meta");
}

#[tokio::test]
async fn test_sync_limit_pages_catch_up() {
    let h = harness(NodeConfig::default());
    let events: Vec<Value> = (0..5).map(|_| event(EventId::new_v4(), "note")).collect();

    let (status, resp) = call(
        &h.app,
        "POST",
        "/api/v1/events/sync?limit=2",
        Some(PATIENT),
        Some(json!({"events": events})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["accepted_event_ids"].as_array().unwrap().len(), 5);
    assert_eq!(resp["new_events"].as_array().unwrap().len(), 2);

    let cursor = resp["server_cursor"].clone();
    let (_, rest) = call(
        &h.app,
        "POST",
        "/api/v1/events/sync?limit=200",
        Some(PATIENT),
        Some(json!({"cursor": cursor, "events": []})),
    )
    .await;
    assert_eq!(rest["new_events"].as_array().unwrap().len(), 3);
    assert_eq!(rest["server_cursor"], json!("5"));
}

#[tokio::test]
async fn test_durable_log_survives_restart() {
    let dir = tempdir().unwrap();
    let case = CaseId::new_v4();
    let mut cfg = NodeConfig::default();
    cfg.event_log_path = Some(dir.path().join("events.clog"));
    cfg.case_tokens.insert(case, PATIENT.to_string());
    cfg.seed_cases.push(case);

    let id = EventId::new_v4();
    {
        let state = AppState::from_config(&cfg).unwrap();
        let app = build_router(state);
        let body = json!({"events": [event(id, "labor_event")]});
        let (status, _) = call(&app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    // Case is recovered from the log even without seeding
    cfg.seed_cases.clear();
    let state = AppState::from_config(&cfg).unwrap();
    let app = build_router(state);
    let uri = format!("/api/v1/cases/{}/events", case);
    let (status, feed) = call(&app, "GET", &uri, Some(PATIENT), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed["events"][0]["event_id"], json!(id));
    assert_eq!(feed["events"][0]["ts"], "2025-03-01T10:15:00.123456Z");

    let body = json!({"events": [event(EventId::new_v4(), "note")]});
    let (_, resp) = call(&app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body)).await;
    assert_eq!(resp["server_cursor"], json!("2"));
}

#[tokio::test]
async fn test_closed_case_stays_closed_after_restart() {
    let dir = tempdir().unwrap();
    let case = CaseId::new_v4();
    let mut cfg = NodeConfig::default();
    cfg.event_log_path = Some(dir.path().join("events.clog"));
    cfg.closed_policy = ClosedCasePolicy::Reject;
    cfg.admin_token = Some(ADMIN.to_string());
    cfg.case_tokens.insert(case, PATIENT.to_string());
    cfg.seed_cases.push(case);

    let closed_at = {
        let app = build_router(AppState::from_config(&cfg).unwrap());
        let uri = format!("/api/v1/cases/{}/close", case);
        let (status, closed) = call(&app, "POST", &uri, Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        closed["closed_at"].clone()
    };

    let app = build_router(AppState::from_config(&cfg).unwrap());
    let (status, detail) = call(&app, "GET", &format!("/api/v1/cases/{}", case), Some(ADMIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["status"], "closed");
    assert_eq!(detail["closed_at"], closed_at);

    let (_, active) = call(&app, "GET", "/api/v1/cases?status=active", Some(ADMIN), None).await;
    assert_eq!(active["cases"], json!([]));

    let body = json!({"events": [event(EventId::new_v4(), "note")]});
    let (status, resp) = call(&app, "POST", "/api/v1/events/sync", Some(PATIENT), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(resp["error"], "case_closed");
}
