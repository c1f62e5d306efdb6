// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sync processing: scope checks, normalization, append, catch-up.

pub mod scope;
pub mod hooks;
pub mod processor;

pub use hooks::{CommitHook, HookChain, HookError};
pub use processor::{CaseSummary, ClosedCasePolicy, FeedResponse, Rejection, SyncProcessor, SyncResponse};
pub use scope::{CallerScope, Principal};
