// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Shared builders for kernel tests.

use crate::event::{EventDraft, NewEvent};
use crate::sync::scope::CallerScope;
use crate::types::{CaseId, EventId};
use chrono::Utc;
use serde_json::{json, Value};

pub fn draft(event_id: EventId, event_type: &str, payload: Value) -> EventDraft {
    EventDraft {
        event_id,
        case_id: None,
        event_type: event_type.to_string(),
        client_ts: Utc::now(),
        track: None,
        source: None,
        payload_version: None,
        payload: Some(payload),
    }
}

pub fn new_event(case_id: CaseId, event_id: EventId, event_type: &str) -> NewEvent {
    let scope = CallerScope::system(case_id);
    NewEvent::from_draft(draft(event_id, event_type, json!({ "n": 1 })), &scope).unwrap()
}
