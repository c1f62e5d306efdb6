// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory view of the log, backed by an optional segment.

use crate::error::LogResult;
use crate::event::{now_micros, Event, NewEvent};
use crate::log::index::{Claim, IdIndex, Slot};
use crate::log::segment::{LogRecord, SegmentWriter};
use crate::types::{CaseId, EventId, Sequence};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-event result of an append.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    /// Newly stored with a fresh sequence.
    Inserted(Event),
    /// Already stored for the same case; the stored copy is returned unchanged.
    AlreadyPresent(Event),
    /// The id is already stored for a different case.
    Conflict { owner: CaseId },
}

impl AppendOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, AppendOutcome::Inserted(_))
    }

    pub fn event(&self) -> Option<&Event> {
        match self {
            AppendOutcome::Inserted(e) | AppendOutcome::AlreadyPresent(e) => Some(e),
            AppendOutcome::Conflict { .. } => None,
        }
    }
}

/// Events of one case, ascending by sequence.
#[derive(Default)]
struct Partition {
    events: Vec<Event>,
}

impl Partition {
    fn after(&self, cursor: Sequence) -> &[Event] {
        let start = self.events.partition_point(|e| e.sequence <= cursor);
        &self.events[start..]
    }

    fn find(&self, sequence: Sequence) -> Option<&Event> {
        self.events
            .binary_search_by_key(&sequence, |e| e.sequence)
            .ok()
            .map(|idx| &self.events[idx])
    }

    fn max_sequence(&self) -> Sequence {
        self.events.last().map(|e| e.sequence).unwrap_or(Sequence::ZERO)
    }
}

type SharedPartition = Arc<RwLock<Partition>>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Append-only, per-case ordered event store.
///
/// The only component that assigns `sequence` and `server_ts`. Appends to
/// different cases take different partition locks; appends to one case are
/// serialized by its partition write lock, which is held across sequence
/// assignment, the durable write and publication.
pub struct EventLog {
    partitions: RwLock<FxHashMap<CaseId, SharedPartition>>,
    index: IdIndex,
    last_sequence: AtomicU64,
    segment: Option<Mutex<SegmentWriter>>,
    stored: AtomicUsize,
}

impl EventLog {
    /// Memory-only log. Contents are lost with the process.
    pub fn in_memory() -> Self {
        Self::with_segment(None)
    }

    fn with_segment(segment: Option<SegmentWriter>) -> Self {
        Self {
            partitions: RwLock::new(FxHashMap::default()),
            index: IdIndex::new(),
            last_sequence: AtomicU64::new(0),
            segment: segment.map(Mutex::new),
            stored: AtomicUsize::new(0),
        }
    }

    /// Open a durable log, replaying whatever the segment already holds.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let (writer, records) = SegmentWriter::open(path)?;
        Self::replayed(writer, records)
    }

    pub(crate) fn replayed(writer: SegmentWriter, records: Vec<LogRecord>) -> LogResult<Self> {
        let log = Self::with_segment(Some(writer));

        let mut by_case: FxHashMap<CaseId, Vec<Event>> = FxHashMap::default();
        let mut max_sequence = 0u64;
        for record in records {
            let event = record.into_event()?;
            let slot = Slot {
                case_id: event.case_id,
                sequence: event.sequence,
            };
            if let Claim::Taken(existing) = log.index.claim(event.event_id, slot) {
                tracing::warn!(
                    "Replay: skipping duplicate event {} (kept sequence {})",
                    event.event_id,
                    existing.sequence
                );
                continue;
            }
            max_sequence = max_sequence.max(event.sequence.0);
            by_case.entry(event.case_id).or_default().push(event);
        }

        let mut stored = 0;
        {
            let mut partitions = write(&log.partitions);
            for (case_id, mut events) in by_case {
                events.sort_by_key(|e| e.sequence);
                stored += events.len();
                partitions.insert(case_id, Arc::new(RwLock::new(Partition { events })));
            }
        }
        log.stored.store(stored, Ordering::SeqCst);
        log.last_sequence.store(max_sequence, Ordering::SeqCst);

        tracing::info!("Event log replayed: {} events, last sequence {}", stored, max_sequence);
        Ok(log)
    }

    fn partition(&self, case_id: &CaseId) -> Option<SharedPartition> {
        read(&self.partitions).get(case_id).cloned()
    }

    fn partition_or_create(&self, case_id: CaseId) -> SharedPartition {
        if let Some(existing) = self.partition(&case_id) {
            return existing;
        }
        write(&self.partitions).entry(case_id).or_default().clone()
    }

    /// Append one event. A stored id is reported, not rejected.
    pub fn append(&self, event: NewEvent) -> LogResult<AppendOutcome> {
        let case_id = event.case_id();
        let partition = self.partition_or_create(case_id);
        let mut part = write(&partition);

        let outcome = self.stage(&part, case_id, event, now_micros(), &[]);
        self.publish(&mut part, case_id, std::slice::from_ref(&outcome))?;
        Ok(outcome)
    }

    /// Append a batch. Each event is independently idempotent; the new events
    /// of each case are written as one durable unit and published together.
    ///
    /// Outcomes are returned in submission order. On a storage error nothing
    /// from the failing case is published and the whole call may be retried.
    pub fn append_batch(&self, events: Vec<NewEvent>) -> LogResult<Vec<(EventId, AppendOutcome)>> {
        let total = events.len();
        let mut groups: Vec<(CaseId, Vec<(usize, NewEvent)>)> = Vec::new();
        for (pos, event) in events.into_iter().enumerate() {
            let case_id = event.case_id();
            match groups.iter_mut().find(|(c, _)| *c == case_id) {
                Some((_, items)) => items.push((pos, event)),
                None => groups.push((case_id, vec![(pos, event)])),
            }
        }

        let mut outcomes: Vec<Option<(EventId, AppendOutcome)>> = vec![None; total];
        for (case_id, items) in groups {
            for (pos, id, outcome) in self.commit_case(case_id, items)? {
                outcomes[pos] = Some((id, outcome));
            }
        }
        Ok(outcomes.into_iter().flatten().collect())
    }

    fn commit_case(
        &self,
        case_id: CaseId,
        items: Vec<(usize, NewEvent)>,
    ) -> LogResult<Vec<(usize, EventId, AppendOutcome)>> {
        let partition = self.partition_or_create(case_id);
        let mut part = write(&partition);

        let server_ts = now_micros();
        let mut positions = Vec::with_capacity(items.len());
        let mut outcomes = Vec::with_capacity(items.len());
        for (pos, new_event) in items {
            positions.push((pos, new_event.event_id()));
            let outcome = self.stage(&part, case_id, new_event, server_ts, &outcomes);
            outcomes.push(outcome);
        }

        self.publish(&mut part, case_id, &outcomes)?;
        Ok(positions
            .into_iter()
            .zip(outcomes)
            .map(|((pos, id), outcome)| (pos, id, outcome))
            .collect())
    }

    /// Resolve one event against the index. A fresh id is claimed and sealed
    /// but stays invisible until `publish`. `staged` holds the outcomes of
    /// earlier events in the same batch.
    fn stage(
        &self,
        part: &Partition,
        case_id: CaseId,
        new_event: NewEvent,
        server_ts: DateTime<Utc>,
        staged: &[AppendOutcome],
    ) -> AppendOutcome {
        let id = new_event.event_id();
        let slot = match self.index.lookup(&id) {
            Some(slot) => slot,
            None => {
                let sequence = Sequence(self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1);
                match self.index.claim(id, Slot { case_id, sequence }) {
                    Claim::Fresh => return AppendOutcome::Inserted(new_event.seal(sequence, server_ts)),
                    Claim::Taken(slot) => slot,
                }
            }
        };

        if slot.case_id != case_id {
            return AppendOutcome::Conflict { owner: slot.case_id };
        }
        let stored = part.find(slot.sequence).or_else(|| {
            staged
                .iter()
                .filter_map(AppendOutcome::event)
                .find(|e| e.sequence == slot.sequence)
        });
        match stored {
            Some(event) => AppendOutcome::AlreadyPresent(event.clone()),
            None => {
                tracing::warn!("Event {} claimed for case {} but not stored", id, case_id);
                AppendOutcome::Conflict { owner: slot.case_id }
            }
        }
    }

    /// Persist the inserted events of `outcomes` and make them readable.
    /// On failure their id claims are released and nothing is published.
    fn publish(&self, part: &mut Partition, case_id: CaseId, outcomes: &[AppendOutcome]) -> LogResult<()> {
        let inserted: Vec<&Event> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                AppendOutcome::Inserted(event) => Some(event),
                _ => None,
            })
            .collect();
        if inserted.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.persist(&inserted) {
            let ids: Vec<EventId> = inserted.iter().map(|e| e.event_id).collect();
            self.index.release(&ids);
            return Err(e);
        }

        part.events.extend(inserted.iter().map(|e| (*e).clone()));
        self.stored.fetch_add(inserted.len(), Ordering::SeqCst);
        tracing::debug!("Committed {} events for case {}", inserted.len(), case_id);
        Ok(())
    }

    fn persist(&self, events: &[&Event]) -> LogResult<()> {
        let Some(segment) = &self.segment else {
            return Ok(());
        };
        let records = events
            .iter()
            .map(|e| LogRecord::from_event(e))
            .collect::<LogResult<Vec<_>>>()?;
        segment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append_all(&records)
    }

    /// Events of `case_id` with `sequence > cursor`, ascending, at most `limit`.
    pub fn read_since(&self, case_id: &CaseId, cursor: Sequence, limit: usize) -> Vec<Event> {
        match self.partition(case_id) {
            Some(partition) => read(&partition).after(cursor).iter().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Highest sequence stored for a case, or zero.
    pub fn max_sequence(&self, case_id: &CaseId) -> Sequence {
        self.partition(case_id)
            .map(|p| read(&p).max_sequence())
            .unwrap_or(Sequence::ZERO)
    }

    pub fn get(&self, event_id: &EventId) -> Option<Event> {
        let slot = self.index.lookup(event_id)?;
        let partition = self.partition(&slot.case_id)?;
        let part = read(&partition);
        part.find(slot.sequence).cloned()
    }

    /// Most recent event of a case matching `pred`.
    pub fn latest_matching<F>(&self, case_id: &CaseId, pred: F) -> Option<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let partition = self.partition(case_id)?;
        let part = read(&partition);
        part.events.iter().rev().find(|e| pred(e)).cloned()
    }

    /// Latest client-claimed time across a case's events.
    pub fn max_client_ts(&self, case_id: &CaseId) -> Option<DateTime<Utc>> {
        let partition = self.partition(case_id)?;
        let part = read(&partition);
        part.events.iter().map(|e| e.client_ts).max()
    }

    /// Cases with at least one stored event.
    pub fn case_ids(&self) -> Vec<CaseId> {
        read(&self.partitions).keys().copied().collect()
    }

    /// Number of stored events across all cases.
    pub fn len(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
