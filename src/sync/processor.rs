// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sync Processor
//!
//! # Protocol
//! ```text
//! cursor + drafts
//! ↓
//! 1. Parse cursor (malformed → whole request rejected)
//! ↓
//! 2. Scope + shape check per draft (violations → rejected[], batch continues)
//! ↓
//! 3. Normalize (track derived, source stamped, defaults)
//! ↓
//! 4. Append batch (inserted + already present → accepted)
//! ↓
//! 5. Catch-up read since cursor
//! ↓
//! 6. Post-commit hooks for inserted events only
//! ```

use crate::cases::{CaseDirectory, CaseRecord};
use crate::config::{clamp_limit, CASE_CLOSED_EVENT, FEED_DEFAULT_LIMIT, FEED_MAX_LIMIT, SYNC_DEFAULT_LIMIT, SYNC_MAX_LIMIT};
use crate::error::{Result, SyncError};
use crate::event::{Event, EventDraft, NewEvent, RejectReason};
use crate::log::{AppendOutcome, EventLog};
use crate::sync::hooks::{CommitHook, HookChain};
use crate::sync::scope::{CallerScope, Principal};
use crate::types::{CaseId, CaseStatus, EventId, Sequence};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;

/// What to do with submissions against a closed case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ClosedCasePolicy {
    /// Append history after close.
    #[default]
    Accept,
    /// Refuse the request with `CaseClosed`; reads still work.
    Reject,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub event_id: EventId,
    pub reason: RejectReason,
}

#[derive(Clone, Debug)]
pub struct SyncResponse {
    /// Newly inserted and already present ids, in submission order.
    pub accepted_ids: Vec<EventId>,
    pub rejected: Vec<Rejection>,
    pub new_cursor: Sequence,
    pub new_events: Vec<Event>,
    /// How many of `accepted_ids` were new to the log.
    pub inserted: usize,
}

#[derive(Clone, Debug)]
pub struct FeedResponse {
    pub new_cursor: Sequence,
    /// `Some(new_cursor)` when rows came back, `None` when caught up.
    pub next_cursor: Option<Sequence>,
    pub events: Vec<Event>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseSummary {
    pub case_id: CaseId,
    pub status: CaseStatus,
    pub labor_active: bool,
    pub postpartum_active: bool,
    pub last_event_ts: Option<DateTime<Utc>>,
}

pub struct SyncProcessor {
    log: Arc<EventLog>,
    cases: Arc<dyn CaseDirectory>,
    hooks: HookChain,
    closed_policy: ClosedCasePolicy,
}

impl SyncProcessor {
    pub fn new(log: Arc<EventLog>, cases: Arc<dyn CaseDirectory>) -> Self {
        Self {
            log,
            cases,
            hooks: HookChain::new(),
            closed_policy: ClosedCasePolicy::default(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_closed_policy(mut self, policy: ClosedCasePolicy) -> Self {
        self.closed_policy = policy;
        self
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn cases(&self) -> &Arc<dyn CaseDirectory> {
        &self.cases
    }

    fn admit_writes(&self, case_id: &CaseId) -> Result<()> {
        match self.cases.status(case_id) {
            None => Err(SyncError::CaseNotFound),
            Some(CaseStatus::Closed) if self.closed_policy == ClosedCasePolicy::Reject => {
                Err(SyncError::CaseClosed)
            }
            Some(_) => Ok(()),
        }
    }

    /// Submit a batch and catch up in one round trip.
    ///
    /// The caller's own inserts come back in `new_events` when they sort
    /// after `cursor`; clients see their writes through the same read.
    pub fn sync(
        &self,
        scope: &CallerScope,
        cursor: Option<&str>,
        drafts: Vec<EventDraft>,
        limit: Option<usize>,
    ) -> Result<SyncResponse> {
        let since = Sequence::from_cursor(cursor)?;
        let case_id = scope.case_id();
        let limit = clamp_limit(limit, SYNC_DEFAULT_LIMIT, SYNC_MAX_LIMIT);

        let mut rejected = Vec::new();
        let mut admitted = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let event_id = draft.event_id;
            match NewEvent::from_draft(draft, scope) {
                Ok(event) => admitted.push(event),
                Err(reason) => rejected.push(Rejection { event_id, reason }),
            }
        }

        if admitted.is_empty() {
            if self.cases.status(&case_id).is_none() {
                return Err(SyncError::CaseNotFound);
            }
        } else {
            self.admit_writes(&case_id)?;
        }

        let mut accepted_ids = Vec::with_capacity(admitted.len());
        let mut inserted = Vec::new();
        if !admitted.is_empty() {
            for (event_id, outcome) in self.log.append_batch(admitted)? {
                match outcome {
                    AppendOutcome::Inserted(event) => {
                        accepted_ids.push(event_id);
                        inserted.push(event);
                    }
                    AppendOutcome::AlreadyPresent(_) => accepted_ids.push(event_id),
                    AppendOutcome::Conflict { owner } => {
                        tracing::debug!(case_id = %case_id, "Event {} already owned by case {}", event_id, owner);
                        rejected.push(Rejection {
                            event_id,
                            reason: RejectReason::EventIdConflict,
                        });
                    }
                }
            }
        }

        let new_events = self.log.read_since(&case_id, since, limit);
        let new_cursor = new_events.iter().map(|e| e.sequence).fold(since, Sequence::max);

        tracing::debug!(
            case_id = %case_id,
            accepted = accepted_ids.len(),
            inserted = inserted.len(),
            rejected = rejected.len(),
            returned = new_events.len(),
            "sync processed"
        );

        let response = SyncResponse {
            accepted_ids,
            rejected,
            new_cursor,
            new_events,
            inserted: inserted.len(),
        };

        self.hooks.run(case_id, &inserted);
        Ok(response)
    }

    /// Read-only catch-up for one case.
    pub fn feed(
        &self,
        principal: &Principal,
        case_id: CaseId,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<FeedResponse> {
        let since = Sequence::from_cursor(cursor)?;
        principal.authorize(case_id)?;
        if self.cases.status(&case_id).is_none() {
            return Err(SyncError::CaseNotFound);
        }
        let limit = clamp_limit(limit, FEED_DEFAULT_LIMIT, FEED_MAX_LIMIT);

        let events = self.log.read_since(&case_id, since, limit);
        let new_cursor = events.iter().map(|e| e.sequence).fold(since, Sequence::max);
        let next_cursor = if events.is_empty() { None } else { Some(new_cursor) };

        Ok(FeedResponse {
            new_cursor,
            next_cursor,
            events,
        })
    }

    /// Append an event the server originates (alert acknowledgements,
    /// closures). Goes through the same hooks as client submissions.
    pub fn record(&self, scope: &CallerScope, event_type: &str, payload: Map<String, Value>) -> Result<Event> {
        let case_id = scope.case_id();
        self.admit_writes(&case_id)?;
        let new_event = NewEvent::originated(scope, event_type, payload);
        match self.log.append(new_event)? {
            AppendOutcome::Inserted(event) => {
                tracing::info!(case_id = %case_id, "Recorded {} ({})", event.event_type, event.source);
                self.hooks.run(case_id, std::slice::from_ref(&event));
                Ok(event)
            }
            AppendOutcome::AlreadyPresent(event) => Ok(event),
            AppendOutcome::Conflict { .. } => Err(SyncError::InvalidInput("event_id_conflict".to_string())),
        }
    }

    /// Close a case. The closure is appended to the log before the directory
    /// changes, so it is replayed after a restart. Closing a closed case
    /// returns the existing record.
    pub fn close_case(&self, case_id: CaseId) -> Result<CaseRecord> {
        let record = self.cases.get(&case_id).ok_or(SyncError::CaseNotFound)?;
        if record.status == CaseStatus::Closed {
            return Ok(record);
        }
        let closure = self.record(&CallerScope::system(case_id), CASE_CLOSED_EVENT, Map::new())?;
        self.cases
            .close_at(&case_id, closure.server_ts)
            .ok_or(SyncError::CaseNotFound)
    }

    /// Current lane toggles and last activity of a case.
    pub fn summarize(&self, case_id: CaseId) -> Result<CaseSummary> {
        let record = self.cases.get(&case_id).ok_or(SyncError::CaseNotFound)?;
        Ok(self.summary_for(record.case_id, record.status))
    }

    pub fn list_summaries(&self, status: CaseStatus) -> Vec<CaseSummary> {
        self.cases
            .list(status)
            .into_iter()
            .map(|record| self.summary_for(record.case_id, record.status))
            .collect()
    }

    fn summary_for(&self, case_id: CaseId, status: CaseStatus) -> CaseSummary {
        let open = status == CaseStatus::Active;
        let latest_toggle = |event_type: &str| {
            self.log
                .latest_matching(&case_id, |e| e.event_type == event_type)
                .map(|e| toggle_active(&e.payload))
                .unwrap_or(false)
        };
        CaseSummary {
            case_id,
            status,
            labor_active: open && latest_toggle("set_labor_active"),
            postpartum_active: open && latest_toggle("set_postpartum_active"),
            last_event_ts: self.log.max_client_ts(&case_id),
        }
    }
}

fn toggle_active(payload: &Value) -> bool {
    match payload.get("active") {
        Some(Value::Bool(active)) => *active,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
