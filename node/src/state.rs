// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::auth::{PrincipalResolver, StaticTokenResolver};
use crate::config::NodeConfig;
use crate::realtime::notifier::{FanoutHook, MetricsHook};
use crate::realtime::registry::ConnectionRegistry;
use caseline_kernel::cases::{CaseDirectory, InMemoryCaseDirectory};
use caseline_kernel::error::LogError;
use caseline_kernel::log::EventLog;
use caseline_kernel::sync::SyncProcessor;
use caseline_kernel::types::CaseStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Liveness timings for a WebSocket session.
#[derive(Clone, Copy, Debug)]
pub struct Liveness {
    /// Silence before the server pings.
    pub idle: Duration,
    /// Time allowed to answer a ping.
    pub grace: Duration,
    pub buffer: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<SyncProcessor>,
    pub cases: Arc<dyn CaseDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub principals: Arc<dyn PrincipalResolver>,
    pub liveness: Liveness,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the processor, hooks and registry. Must run inside a Tokio runtime.
    pub fn new(
        log: Arc<EventLog>,
        cases: Arc<dyn CaseDirectory>,
        principals: Arc<dyn PrincipalResolver>,
        cfg: &NodeConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(cfg.ws_send_timeout));
        let processor = SyncProcessor::new(log, cases.clone())
            .with_closed_policy(cfg.closed_policy)
            .with_hook(Arc::new(MetricsHook))
            .with_hook(Arc::new(FanoutHook::new(registry.clone(), Handle::current())));

        Self {
            processor: Arc::new(processor),
            cases,
            registry,
            principals,
            liveness: Liveness {
                idle: cfg.ws_idle,
                grace: cfg.ws_grace,
                buffer: cfg.ws_buffer,
            },
            shutdown: CancellationToken::new(),
        }
    }

    /// Open the configured log, seed cases and load tokens.
    pub fn from_config(cfg: &NodeConfig) -> Result<Self, LogError> {
        let log = match &cfg.event_log_path {
            Some(path) => {
                let log = EventLog::open(path)?;
                tracing::info!("Event log opened at {:?} ({} events)", path, log.len());
                log
            }
            None => {
                tracing::warn!("No event log path configured: events are kept in memory only");
                EventLog::in_memory()
            }
        };

        // Cases with history come back with the status their log implies
        let cases = InMemoryCaseDirectory::new();
        let restored = cases.restore(&log);
        for case_id in &cfg.seed_cases {
            cases.insert(*case_id);
        }
        tracing::info!(
            "Case directory holds {} active and {} closed case(s), {} restored from the log",
            cases.list(CaseStatus::Active).len(),
            cases.list(CaseStatus::Closed).len(),
            restored
        );

        Ok(Self::new(
            Arc::new(log),
            Arc::new(cases),
            Arc::new(StaticTokenResolver::from_config(cfg)),
            cfg,
        ))
    }
}
