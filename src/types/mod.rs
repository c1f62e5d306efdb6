// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod id;
pub mod enums;
pub mod cursor;

pub use cursor::Sequence;
pub use enums::{CaseStatus, Source, Track};
pub use id::{CaseId, EventId};
