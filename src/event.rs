// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event model.
//!
//! Events move through a strict two stage pipeline:
//!
//! ```text
//! EventDraft (untrusted, as submitted)
//!   -> NewEvent (track derived, source stamped, defaults applied)
//!   -> Event    (sequence + server_ts assigned by the log)
//! ```
//!
//! Client supplied `track`, `source` and `server_ts` never survive the first
//! step: `NewEvent` has no constructor that accepts them.

use crate::config::DEFAULT_PAYLOAD_VERSION;
use crate::sync::scope::CallerScope;
use crate::track::classify;
use crate::types::{CaseId, EventId, Sequence, Source, Track};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event as submitted by a client. Only shape is trusted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDraft {
    pub event_id: EventId,
    #[serde(default)]
    pub case_id: Option<CaseId>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "ts")]
    pub client_ts: DateTime<Utc>,
    /// Accepted on the wire and ignored.
    #[serde(default)]
    pub track: Option<String>,
    /// Accepted on the wire and ignored.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "payload_v")]
    pub payload_version: Option<u32>,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Why a single submitted event was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The event names a case outside the caller's scope.
    CaseScopeViolation,
    /// The event id is already stored under a different case.
    EventIdConflict,
    /// Payload is not an object, or payload version is zero.
    InvalidPayload,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::CaseScopeViolation => "case_scope_violation",
            RejectReason::EventIdConflict => "event_id_conflict",
            RejectReason::InvalidPayload => "invalid_payload",
        }
    }
}

/// Normalized event, ready for the log. Has no sequence yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    event_id: EventId,
    case_id: CaseId,
    event_type: String,
    client_ts: DateTime<Utc>,
    track: Track,
    source: Source,
    payload_version: u32,
    payload: Value,
}

impl NewEvent {
    /// Validate a client draft against the caller's scope and normalize it.
    pub fn from_draft(draft: EventDraft, scope: &CallerScope) -> Result<Self, RejectReason> {
        if let Some(claimed) = draft.case_id {
            if claimed != scope.case_id() {
                return Err(RejectReason::CaseScopeViolation);
            }
        }

        let payload_version = match draft.payload_version {
            None => DEFAULT_PAYLOAD_VERSION,
            Some(0) => return Err(RejectReason::InvalidPayload),
            Some(v) => v,
        };

        let payload = match draft.payload {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(obj @ Value::Object(_)) => obj,
            Some(_) => return Err(RejectReason::InvalidPayload),
        };

        Ok(Self {
            event_id: draft.event_id,
            case_id: scope.case_id(),
            track: classify(&draft.event_type),
            event_type: draft.event_type,
            client_ts: truncate_micros(draft.client_ts),
            source: scope.source(),
            payload_version,
            payload,
        })
    }

    /// Build a server originated event (alert acknowledgements, closures).
    /// The id is freshly generated and the client time is now.
    pub fn originated(scope: &CallerScope, event_type: &str, payload: Map<String, Value>) -> Self {
        Self {
            event_id: EventId::new_v4(),
            case_id: scope.case_id(),
            event_type: event_type.to_string(),
            client_ts: now_micros(),
            track: classify(event_type),
            source: scope.source(),
            payload_version: DEFAULT_PAYLOAD_VERSION,
            payload: Value::Object(payload),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn case_id(&self) -> CaseId {
        self.case_id
    }

    /// Seal into a stored event. Only the log calls this.
    pub(crate) fn seal(self, sequence: Sequence, server_ts: DateTime<Utc>) -> Event {
        Event {
            event_id: self.event_id,
            case_id: self.case_id,
            event_type: self.event_type,
            client_ts: self.client_ts,
            server_ts,
            track: self.track,
            source: self.source,
            payload_version: self.payload_version,
            payload: self.payload,
            sequence,
        }
    }
}

/// Stored event. Immutable once the log hands it out.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub event_id: EventId,
    pub case_id: CaseId,
    pub event_type: String,
    pub client_ts: DateTime<Utc>,
    pub server_ts: DateTime<Utc>,
    pub track: Track,
    pub source: Source,
    pub payload_version: u32,
    pub payload: Value,
    pub sequence: Sequence,
}

/// Current time at the microsecond precision the segment file keeps.
pub fn now_micros() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

pub(crate) fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = ts.timestamp_subsec_micros() * 1_000;
    DateTime::from_timestamp(ts.timestamp(), nanos).unwrap_or(ts)
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::scope::{CallerScope, Principal};
    use serde_json::json;

    fn draft(event_type: &str) -> EventDraft {
        EventDraft {
            event_id: EventId::new_v4(),
            case_id: None,
            event_type: event_type.to_string(),
            client_ts: Utc::now(),
            track: Some("meta".into()),
            source: Some("system".into()),
            payload_version: None,
            payload: None,
        }
    }

    #[test]
    fn test_draft_defaults_and_overrides() {
        let case = CaseId::new_v4();
        let scope = CallerScope::resolve(&Principal::Case(case), None).unwrap();

        let ev = NewEvent::from_draft(draft("contraction_start"), &scope).unwrap();
        assert_eq!(ev.track, Track::Labor);
        assert_eq!(ev.source, Source::Woman);
        assert_eq!(ev.case_id(), case);
        assert_eq!(ev.payload_version, 1);
        assert_eq!(ev.payload, json!({}));
    }

    #[test]
    fn test_draft_rejects_foreign_case() {
        let scope = CallerScope::resolve(&Principal::Case(CaseId::new_v4()), None).unwrap();
        let mut d = draft("note");
        d.case_id = Some(CaseId::new_v4());
        assert_eq!(NewEvent::from_draft(d, &scope), Err(RejectReason::CaseScopeViolation));
    }

    #[test]
    fn test_draft_rejects_non_object_payload() {
        let scope = CallerScope::resolve(&Principal::Case(CaseId::new_v4()), None).unwrap();
        let mut d = draft("note");
        d.payload = Some(json!([1, 2, 3]));
        assert_eq!(NewEvent::from_draft(d, &scope), Err(RejectReason::InvalidPayload));

        let mut d = draft("note");
        d.payload_version = Some(0);
        assert_eq!(NewEvent::from_draft(d, &scope), Err(RejectReason::InvalidPayload));
    }

    #[test]
    fn test_micros_roundtrip_is_stable() {
        let ts = now_micros();
        assert_eq!(from_micros(to_micros(ts)), Some(ts));
    }
}
