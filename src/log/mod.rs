// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-only event log.
//!
//! # Architecture
//! - Partitions = one ordered `Vec<Event>` per case, each behind its own lock
//! - Index = global `event_id -> (case, sequence)` map, sharded
//! - Segment = optional durable file; the in-memory state is rebuilt from it
//!
//! # Guarantees
//! - A sequence is assigned exactly once and never reused
//! - Per case, visibility order equals assignment order
//! - Nothing becomes visible before it is durable
//! - Re-submitting a stored id is a no-op, not an error

pub mod index;
pub mod segment;
pub mod store;

pub use segment::{LogRecord, SegmentWriter};
pub use store::{AppendOutcome, EventLog};
