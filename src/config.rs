// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants.

/// Hard upper bound on rows returned by a sync catch-up read.
pub const SYNC_MAX_LIMIT: usize = 200;

/// Rows returned by a sync catch-up read when the caller does not ask.
pub const SYNC_DEFAULT_LIMIT: usize = SYNC_MAX_LIMIT;

/// Hard upper bound on rows returned by a feed read.
pub const FEED_MAX_LIMIT: usize = 200;

/// Rows returned by a feed read when the caller does not ask.
pub const FEED_DEFAULT_LIMIT: usize = 50;

/// Number of independently locked shards in the global event id index.
pub const ID_INDEX_SHARDS: usize = 16;

/// Magic bytes at the start of a segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"CLOG";

/// Segment file format version.
pub const SEGMENT_VERSION: u32 = 1;

/// Largest frame body a segment may hold. A length field above this is
/// corruption, never a torn write.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Payload version assumed when a client omits it.
pub const DEFAULT_PAYLOAD_VERSION: u32 = 1;

/// Event type the server records when a case is closed.
pub const CASE_CLOSED_EVENT: &str = "case_closed";

/// Clamp a caller supplied limit into `[1, max]`, using `default` when absent.
pub fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}
