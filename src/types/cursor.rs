// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sequence numbers and the opaque cursor that carries them over the wire.
//!
//! A cursor is simply the last sequence a caller has seen, rendered as a
//! decimal string. Callers never construct one; they echo what they got.

use crate::error::SyncError;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Store-assigned position of an event. `Sequence(0)` precedes every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Sequence(pub u64);

impl Sequence {
    pub const ZERO: Sequence = Sequence(0);

    /// Render as an opaque cursor string.
    pub fn to_cursor(&self) -> String {
        self.0.to_string()
    }

    /// Parse a cursor. Absent or empty means "from the beginning"; anything
    /// that is not a non-negative integer is rejected outright.
    pub fn from_cursor(raw: Option<&str>) -> Result<Self, SyncError> {
        match raw {
            None | Some("") => Ok(Sequence::ZERO),
            Some(text) if text.bytes().all(|b| b.is_ascii_digit()) => text
                .parse::<u64>()
                .map(Sequence)
                .map_err(|_| SyncError::InvalidCursor),
            Some(_) => Err(SyncError::InvalidCursor),
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
