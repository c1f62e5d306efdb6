// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use caseline_kernel::cases::InMemoryCaseDirectory;
use caseline_kernel::log::EventLog;
use caseline_node::auth::StaticTokenResolver;
use caseline_node::config::NodeConfig;
use caseline_node::server::build_router;
use caseline_node::state::AppState;
use caseline_kernel::types::CaseId;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt; // for oneshot

pub const ADMIN: &str = "midwife-token";
pub const PATIENT: &str = "patient-token";
pub const OTHER_PATIENT: &str = "other-patient-token";

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub cases: Arc<InMemoryCaseDirectory>,
    pub case: CaseId,
    pub other_case: CaseId,
}

pub fn harness(cfg: NodeConfig) -> Harness {
    let cases = Arc::new(InMemoryCaseDirectory::new());
    let case = cases.create();
    let other_case = cases.create();
    let resolver = StaticTokenResolver::new()
        .with_admin(ADMIN)
        .with_case(case, PATIENT)
        .with_case(other_case, OTHER_PATIENT);
    let state = AppState::new(Arc::new(EventLog::in_memory()), cases.clone(), Arc::new(resolver), &cfg);
    Harness {
        app: build_router(state.clone()),
        state,
        cases,
        case,
        other_case,
    }
}

pub async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
