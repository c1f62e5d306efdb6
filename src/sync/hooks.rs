// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Post-commit hooks.
//!
//! Side effects that must only happen after the log has durably accepted a
//! batch (real-time fan-out, counters). Hooks run after the response is
//! built; a hook that fails or panics is logged and skipped, and never
//! changes the response or stops the hooks after it.

use crate::event::Event;
use crate::types::CaseId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct HookError(pub String);

/// Receives newly inserted events (never duplicates) once per commit.
pub trait CommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn after_commit(&self, case_id: CaseId, inserted: &[Event]) -> Result<(), HookError>;
}

/// Ordered list of hooks, run in registration order.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn CommitHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn CommitHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook. Returns how many completed without error.
    pub fn run(&self, case_id: CaseId, inserted: &[Event]) -> usize {
        if inserted.is_empty() {
            return 0;
        }
        let mut ok = 0;
        for hook in &self.hooks {
            match catch_unwind(AssertUnwindSafe(|| hook.after_commit(case_id, inserted))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => {
                    tracing::warn!(hook = hook.name(), case_id = %case_id, "post-commit hook failed: {}", e);
                }
                Err(_) => {
                    tracing::error!(hook = hook.name(), case_id = %case_id, "post-commit hook panicked");
                }
            }
        }
        ok
    }
}
