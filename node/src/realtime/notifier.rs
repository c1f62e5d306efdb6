// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Post-commit hooks wiring the kernel to the node.

use crate::realtime::messages::event_notification;
use crate::realtime::registry::ConnectionRegistry;
use crate::telemetry::EVENTS_APPENDED;
use caseline_kernel::event::Event;
use caseline_kernel::sync::{CommitHook, HookError};
use caseline_kernel::types::CaseId;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Pushes newly stored events to the case's live observers.
///
/// Commits happen on blocking threads, so delivery is handed to the runtime
/// and the committing request never waits on a slow socket.
pub struct FanoutHook {
    registry: Arc<ConnectionRegistry>,
    runtime: Handle,
}

impl FanoutHook {
    pub fn new(registry: Arc<ConnectionRegistry>, runtime: Handle) -> Self {
        Self { registry, runtime }
    }
}

impl CommitHook for FanoutHook {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn after_commit(&self, case_id: CaseId, inserted: &[Event]) -> Result<(), HookError> {
        if self.registry.connection_count(case_id) == 0 {
            return Ok(());
        }
        let frames: Vec<_> = inserted.iter().map(event_notification).collect();
        let registry = self.registry.clone();
        // One task per commit keeps sequence order within the batch
        self.runtime.spawn(async move {
            for frame in frames {
                registry.broadcast(case_id, frame).await;
            }
        });
        Ok(())
    }
}

/// Counts stored events.
pub struct MetricsHook;

impl CommitHook for MetricsHook {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn after_commit(&self, _case_id: CaseId, inserted: &[Event]) -> Result<(), HookError> {
        metrics::counter!(EVENTS_APPENDED, inserted.len() as u64);
        Ok(())
    }
}
