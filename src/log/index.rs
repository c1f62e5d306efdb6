// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Global event id index.
//!
//! Event ids are unique across cases, so the uniqueness check cannot live in
//! a case partition. The map is split into shards keyed by id hash so that
//! appends to different cases rarely touch the same lock.

use crate::config::ID_INDEX_SHARDS;
use crate::types::{CaseId, EventId, Sequence};
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where an id lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub case_id: CaseId,
    pub sequence: Sequence,
}

/// Result of trying to claim an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// The id was free and is now held by the caller.
    Fresh,
    /// The id is already held.
    Taken(Slot),
}

pub struct IdIndex {
    shards: Vec<Mutex<FxHashMap<EventId, Slot>>>,
}

impl IdIndex {
    pub fn new() -> Self {
        let shards = (0..ID_INDEX_SHARDS)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();
        Self { shards }
    }

    fn shard(&self, id: &EventId) -> MutexGuard<'_, FxHashMap<EventId, Slot>> {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        self.shards[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically check for and claim an id.
    pub fn claim(&self, id: EventId, slot: Slot) -> Claim {
        let mut shard = self.shard(&id);
        match shard.get(&id) {
            Some(existing) => Claim::Taken(*existing),
            None => {
                shard.insert(id, slot);
                Claim::Fresh
            }
        }
    }

    pub fn lookup(&self, id: &EventId) -> Option<Slot> {
        self.shard(id).get(id).copied()
    }

    /// Drop claims that never became durable.
    pub fn release(&self, ids: &[EventId]) {
        for id in ids {
            self.shard(id).remove(id);
        }
    }
}

impl Default for IdIndex {
    fn default() -> Self {
        Self::new()
    }
}
