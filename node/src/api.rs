// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Wire types of the HTTP surface.

use caseline_kernel::event::{Event, EventDraft};
use caseline_kernel::sync::{CaseSummary, FeedResponse, Rejection, SyncResponse};
use caseline_kernel::types::{CaseId, CaseStatus, EventId, Source, Track};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored event as clients see it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub case_id: CaseId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: DateTime<Utc>,
    pub server_ts: DateTime<Utc>,
    pub track: Track,
    pub source: Source,
    pub payload_v: u32,
    pub payload: Value,
}

impl From<&Event> for EventEnvelope {
    fn from(e: &Event) -> Self {
        Self {
            event_id: e.event_id,
            case_id: e.case_id,
            event_type: e.event_type.clone(),
            ts: e.client_ts,
            server_ts: e.server_ts,
            track: e.track,
            source: e.source,
            payload_v: e.payload_version,
            payload: e.payload.clone(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct SyncRequest {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub case_id: Option<CaseId>,
    #[serde(default)]
    pub events: Vec<EventDraft>,
}

#[derive(Deserialize, Debug, Default)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RejectedEvent {
    pub event_id: EventId,
    pub reason: String,
}

impl From<&Rejection> for RejectedEvent {
    fn from(r: &Rejection) -> Self {
        Self {
            event_id: r.event_id,
            reason: r.reason.as_str().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SyncResponseBody {
    pub accepted_event_ids: Vec<EventId>,
    pub rejected: Vec<RejectedEvent>,
    pub server_cursor: String,
    pub new_events: Vec<EventEnvelope>,
}

impl From<&SyncResponse> for SyncResponseBody {
    fn from(r: &SyncResponse) -> Self {
        Self {
            accepted_event_ids: r.accepted_ids.clone(),
            rejected: r.rejected.iter().map(RejectedEvent::from).collect(),
            server_cursor: r.new_cursor.to_cursor(),
            new_events: r.new_events.iter().map(EventEnvelope::from).collect(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct FeedQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct FeedResponseBody {
    pub server_cursor: String,
    pub next_cursor: Option<String>,
    pub events: Vec<EventEnvelope>,
}

impl From<&FeedResponse> for FeedResponseBody {
    fn from(r: &FeedResponse) -> Self {
        Self {
            server_cursor: r.new_cursor.to_cursor(),
            next_cursor: r.next_cursor.map(|c| c.to_cursor()),
            events: r.events.iter().map(EventEnvelope::from).collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct CaseListQuery {
    #[serde(default = "default_status")]
    pub status: CaseStatus,
    /// Offset into the list, as returned in `next_cursor`.
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

fn default_status() -> CaseStatus {
    CaseStatus::Active
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct CaseSummaryBody {
    pub case_id: CaseId,
    pub status: CaseStatus,
    pub labor_active: bool,
    pub postpartum_active: bool,
    pub last_event_ts: Option<DateTime<Utc>>,
}

impl From<&CaseSummary> for CaseSummaryBody {
    fn from(s: &CaseSummary) -> Self {
        Self {
            case_id: s.case_id,
            status: s.status,
            labor_active: s.labor_active,
            postpartum_active: s.postpartum_active,
            last_event_ts: s.last_event_ts,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CaseListResponse {
    pub cases: Vec<CaseSummaryBody>,
    pub server_cursor: String,
    pub next_cursor: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CaseDetailResponse {
    pub case_id: CaseId,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub labor_active: bool,
    pub postpartum_active: bool,
    pub last_event_ts: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CloseCaseResponse {
    pub case_id: CaseId,
    pub status: CaseStatus,
    pub closed_at: Option<DateTime<Utc>>,
    /// Real-time connections drained by the close.
    pub disconnected: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub ok: bool,
    pub events: usize,
}

#[derive(Deserialize, Debug, Default)]
pub struct WsQuery {
    pub token: Option<String>,
}
