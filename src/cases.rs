// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Case directory.
//!
//! Case creation and join codes live elsewhere; the core only needs to know
//! whether a case exists and whether it is still active.

use crate::config::CASE_CLOSED_EVENT;
use crate::event::{now_micros, Event};
use crate::log::EventLog;
use crate::types::{CaseId, CaseStatus, Sequence, Source};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaseRecord {
    pub case_id: CaseId,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Lookup contract consumed by the sync processor and connection registry.
pub trait CaseDirectory: Send + Sync {
    fn get(&self, case_id: &CaseId) -> Option<CaseRecord>;

    /// Cases with the given status, oldest first.
    fn list(&self, status: CaseStatus) -> Vec<CaseRecord>;

    /// Mark a case closed as of `closed_at`. Returns the updated record, or
    /// `None` if unknown. Closing an already closed case keeps its original
    /// `closed_at`.
    fn close_at(&self, case_id: &CaseId, closed_at: DateTime<Utc>) -> Option<CaseRecord>;

    fn close(&self, case_id: &CaseId) -> Option<CaseRecord> {
        self.close_at(case_id, now_micros())
    }

    fn status(&self, case_id: &CaseId) -> Option<CaseStatus> {
        self.get(case_id).map(|c| c.status)
    }
}

/// Process-local directory. Used by the node until an external one is wired in.
#[derive(Default)]
pub struct InMemoryCaseDirectory {
    cases: RwLock<HashMap<CaseId, CaseRecord>>,
}

impl InMemoryCaseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active case with a fresh id.
    pub fn create(&self) -> CaseId {
        let case_id = CaseId::new_v4();
        self.insert(case_id);
        case_id
    }

    /// Register a known id as active. Existing entries are left untouched.
    pub fn insert(&self, case_id: CaseId) {
        let mut cases = self.cases.write().unwrap_or_else(PoisonError::into_inner);
        cases.entry(case_id).or_insert_with(|| CaseRecord {
            case_id,
            status: CaseStatus::Active,
            created_at: now_micros(),
            closed_at: None,
        });
    }

    /// Rebuild the entry of every case with history in `log`. A case whose
    /// log holds a system `case_closed` event comes back closed at that
    /// event's server time.
    pub fn restore(&self, log: &EventLog) -> usize {
        let mut restored = 0;
        for case_id in log.case_ids() {
            let Some(first) = log.read_since(&case_id, Sequence::ZERO, 1).into_iter().next() else {
                continue;
            };
            let closed_at = log.latest_matching(&case_id, is_closure).map(|e| e.server_ts);
            let record = CaseRecord {
                case_id,
                status: if closed_at.is_some() { CaseStatus::Closed } else { CaseStatus::Active },
                created_at: first.server_ts,
                closed_at,
            };
            self.cases.write().unwrap_or_else(PoisonError::into_inner).insert(case_id, record);
            restored += 1;
        }
        restored
    }
}

/// Closures are only ever written by the server.
pub fn is_closure(event: &Event) -> bool {
    event.event_type == CASE_CLOSED_EVENT && event.source == Source::System
}

impl CaseDirectory for InMemoryCaseDirectory {
    fn get(&self, case_id: &CaseId) -> Option<CaseRecord> {
        let cases = self.cases.read().unwrap_or_else(PoisonError::into_inner);
        cases.get(case_id).copied()
    }

    fn list(&self, status: CaseStatus) -> Vec<CaseRecord> {
        let cases = self.cases.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<CaseRecord> = cases.values().filter(|c| c.status == status).copied().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.case_id.cmp(&b.case_id)));
        out
    }

    fn close_at(&self, case_id: &CaseId, closed_at: DateTime<Utc>) -> Option<CaseRecord> {
        let mut cases = self.cases.write().unwrap_or_else(PoisonError::into_inner);
        let record = cases.get_mut(case_id)?;
        if record.status == CaseStatus::Active {
            record.status = CaseStatus::Closed;
            record.closed_at = Some(closed_at);
        }
        Some(*record)
    }
}
