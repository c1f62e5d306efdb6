// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::api::*;
use crate::errors::ApiError;
use crate::realtime::session::{admit, reject, run_session};
use crate::state::AppState;
use crate::telemetry::{EVENTS_DUPLICATE, SYNC_DURATION, SYNC_REQUESTS};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use axum_extra::TypedHeader;
use caseline_kernel::config::{clamp_limit, FEED_DEFAULT_LIMIT, FEED_MAX_LIMIT};
use caseline_kernel::error::SyncError;
use caseline_kernel::sync::{CallerScope, Principal};
use caseline_kernel::types::{CaseId, EventId, Sequence};
use headers::authorization::Bearer;
use headers::Authorization;
use serde_json::{json, Map};
use std::str::FromStr;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/events/sync", post(sync_events))
        .route("/cases", get(list_cases))
        .route("/cases/:case_id", get(get_case))
        .route("/cases/:case_id/events", get(case_feed))
        .route("/cases/:case_id/close", post(close_case))
        .route("/cases/:case_id/alerts/:alert_event_id/ack", post(alert_ack))
        .route("/cases/:case_id/alerts/:alert_event_id/resolve", post(alert_resolve))
        .route_layer(from_fn_with_state(state.clone(), auth_guard));

    // WebSocket clients cannot set headers; the token rides in the query
    let api = Router::new()
        .route("/health", get(health))
        .route("/ws/cases/:case_id", get(ws_connect))
        .merge(protected);

    Router::new()
        .nest("/api/v1", api)
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_guard(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(ApiError::Unauthorized);
    };
    let principal = state
        .principals
        .resolve(bearer.token())
        .map_err(|_| ApiError::Unauthorized)?;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

fn parse_case_id(raw: &str) -> Result<CaseId, ApiError> {
    CaseId::from_str(raw).map_err(|_| ApiError::invalid_input("invalid_case_id"))
}

fn parse_event_id(raw: &str) -> Result<EventId, ApiError> {
    EventId::from_str(raw).map_err(|_| ApiError::invalid_input("invalid_event_id"))
}

/// Run a log-touching closure off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!("Blocking task failed: {}", e);
            Err(ApiError::Internal)
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        events: state.processor.log().len(),
    })
}

async fn sync_events(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<LimitQuery>, QueryRejection>,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponseBody>, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::invalid_input("invalid_limit"))?;
    let Json(req) = body.map_err(|e| {
        tracing::debug!("Sync body rejected: {}", e);
        ApiError::invalid_input("invalid_body")
    })?;
    let scope = CallerScope::resolve(&principal, req.case_id)?;

    let started = Instant::now();
    let processor = state.processor.clone();
    let response = blocking(move || processor.sync(&scope, req.cursor.as_deref(), req.events, query.limit)).await?;

    metrics::counter!(SYNC_REQUESTS, 1);
    metrics::histogram!(SYNC_DURATION, started.elapsed().as_secs_f64());
    let duplicates = response.accepted_ids.len().saturating_sub(response.inserted);
    if duplicates > 0 {
        metrics::counter!(EVENTS_DUPLICATE, duplicates as u64);
    }

    Ok(Json(SyncResponseBody::from(&response)))
}

async fn case_feed(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(case_id): Path<String>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<Json<FeedResponseBody>, ApiError> {
    let case_id = parse_case_id(&case_id)?;
    let Query(query) = query.map_err(|_| ApiError::invalid_input("invalid_limit"))?;

    let processor = state.processor.clone();
    let feed = blocking(move || processor.feed(&principal, case_id, query.cursor.as_deref(), query.limit)).await?;
    Ok(Json(FeedResponseBody::from(&feed)))
}

async fn list_cases(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<CaseListQuery>, QueryRejection>,
) -> Result<Json<CaseListResponse>, ApiError> {
    principal.require_administrator()?;
    let Query(query) = query.map_err(|_| ApiError::invalid_input("invalid_query"))?;
    let offset = Sequence::from_cursor(query.cursor.as_deref())?.0 as usize;
    let limit = clamp_limit(query.limit, FEED_DEFAULT_LIMIT, FEED_MAX_LIMIT);

    let processor = state.processor.clone();
    let status = query.status;
    let summaries = blocking(move || Ok(processor.list_summaries(status))).await?;

    let page: Vec<CaseSummaryBody> = summaries.iter().skip(offset).take(limit).map(CaseSummaryBody::from).collect();
    let next_cursor = (page.len() == limit).then(|| (offset + page.len()).to_string());
    Ok(Json(CaseListResponse {
        cases: page,
        server_cursor: offset.to_string(),
        next_cursor,
    }))
}

async fn get_case(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(case_id): Path<String>,
) -> Result<Json<CaseDetailResponse>, ApiError> {
    let case_id = parse_case_id(&case_id)?;
    principal.authorize(case_id)?;
    let record = state.cases.get(&case_id).ok_or(SyncError::CaseNotFound)?;

    let processor = state.processor.clone();
    let summary = blocking(move || processor.summarize(case_id)).await?;
    Ok(Json(CaseDetailResponse {
        case_id,
        status: record.status,
        created_at: record.created_at,
        closed_at: record.closed_at,
        labor_active: summary.labor_active,
        postpartum_active: summary.postpartum_active,
        last_event_ts: summary.last_event_ts,
    }))
}

async fn close_case(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(case_id): Path<String>,
) -> Result<Json<CloseCaseResponse>, ApiError> {
    let case_id = parse_case_id(&case_id)?;
    principal.require_administrator()?;
    let processor = state.processor.clone();
    let record = blocking(move || processor.close_case(case_id)).await?;
    let disconnected = state.registry.close_case(case_id);
    tracing::info!(case_id = %case_id, "Case closed");

    Ok(Json(CloseCaseResponse {
        case_id,
        status: record.status,
        closed_at: record.closed_at,
        disconnected,
    }))
}

async fn alert_ack(
    state: State<AppState>,
    principal: Extension<Principal>,
    Path((case_id, alert_event_id)): Path<(String, String)>,
) -> Result<Json<EventEnvelope>, ApiError> {
    record_alert(state, principal, &case_id, &alert_event_id, "alert_ack").await
}

async fn alert_resolve(
    state: State<AppState>,
    principal: Extension<Principal>,
    Path((case_id, alert_event_id)): Path<(String, String)>,
) -> Result<Json<EventEnvelope>, ApiError> {
    record_alert(state, principal, &case_id, &alert_event_id, "alert_resolve").await
}

async fn record_alert(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    case_id: &str,
    alert_event_id: &str,
    event_type: &'static str,
) -> Result<Json<EventEnvelope>, ApiError> {
    let case_id = parse_case_id(case_id)?;
    let alert_event_id = parse_event_id(alert_event_id)?;
    principal.require_administrator()?;

    let mut payload = Map::new();
    payload.insert("alert_event_id".to_string(), json!(alert_event_id));
    let scope = CallerScope::resolve(&principal, Some(case_id))?;
    let processor = state.processor.clone();
    let event = blocking(move || processor.record(&scope, event_type, payload)).await?;
    Ok(Json(EventEnvelope::from(&event)))
}

async fn ws_connect(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let case_id = CaseId::from_str(&case_id).ok();
    let principal = query
        .token
        .as_deref()
        .and_then(|token| state.principals.resolve(token).ok());

    ws.on_upgrade(move |socket| async move {
        if state.shutdown.is_cancelled() {
            return reject(socket, "Server shutting down").await;
        }
        match admit(state.cases.as_ref(), case_id, principal) {
            Ok((case_id, principal)) => run_session(socket, state, case_id, principal).await,
            Err(reason) => reject(socket, reason).await,
        }
    })
}

async fn metrics_handler() -> impl IntoResponse {
    crate::telemetry::get_metrics()
}
