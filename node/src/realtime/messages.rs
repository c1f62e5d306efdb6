// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! JSON frames pushed to real-time observers.

use crate::api::EventEnvelope;
use crate::realtime::registry::ConnectionId;
use caseline_kernel::event::Event;
use caseline_kernel::sync::Principal;
use caseline_kernel::types::CaseId;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// First frame a connection receives after registration.
pub fn welcome(case_id: CaseId, connection_id: ConnectionId, user_type: &str) -> Arc<str> {
    json!({
        "type": "connection",
        "status": "connected",
        "case_id": case_id,
        "connection_id": connection_id,
        "user_type": user_type,
    })
    .to_string()
    .into()
}

/// Newly stored event.
pub fn event_notification(event: &Event) -> Arc<str> {
    json!({
        "type": "event",
        "case_id": event.case_id,
        "event": EventEnvelope::from(event),
        "timestamp": now(),
    })
    .to_string()
    .into()
}

/// Rebroadcast of a client frame. Returns `None` unless the frame is a JSON
/// object; the client's `type` is kept, everything else is re-stamped from
/// the sender's principal.
pub fn relay(case_id: CaseId, sender: &Principal, raw: &str) -> Option<Arc<str>> {
    let Value::Object(mut inbound) = serde_json::from_str::<Value>(raw).ok()? else {
        return None;
    };
    let kind = match inbound.remove("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        _ => "message".to_string(),
    };
    let payload = inbound.remove("payload").unwrap_or_else(|| json!({}));
    Some(
        json!({
            "type": kind,
            "case_id": case_id,
            "user_id": sender.user_id(),
            "user_type": sender.user_type(),
            "timestamp": now(),
            "payload": payload,
        })
        .to_string()
        .into(),
    )
}
