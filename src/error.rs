// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

/// Failures of the durable event log.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error at offset {offset}: {message}")]
    Decode { offset: u64, message: String },

    #[error("Segment corrupted at offset {offset}")]
    Corrupted { offset: u64 },

    #[error("Invalid segment header")]
    InvalidHeader,
}

pub type LogResult<T> = core::result::Result<T, LogError>;

/// Request level failures of the sync processor.
///
/// Per-event problems (scope violations, id conflicts) are not errors; they
/// are reported as rejections inside a successful response.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid_cursor")]
    InvalidCursor,

    #[error("{0}")]
    InvalidInput(String),

    #[error("forbidden")]
    Forbidden,

    #[error("case_not_found")]
    CaseNotFound,

    #[error("case_closed")]
    CaseClosed,

    #[error("storage unavailable: {0}")]
    Storage(#[from] LogError),
}

pub type Result<T> = core::result::Result<T, SyncError>;
