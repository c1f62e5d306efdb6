// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const DEFAULT_FILTER: &str = "caseline_node=debug,caseline_kernel=info,tower_http=debug";

pub const EVENTS_APPENDED: &str = "caseline_events_appended_total";
pub const EVENTS_DUPLICATE: &str = "caseline_events_duplicate_total";
pub const SYNC_REQUESTS: &str = "caseline_sync_requests_total";
pub const SYNC_DURATION: &str = "caseline_sync_duration_seconds";
pub const FANOUT_SEND_FAILURES: &str = "caseline_fanout_send_failures_total";
pub const WS_CONNECTIONS: &str = "caseline_ws_connections";

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    if tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_err()
    {
        tracing::warn!("Tracing subscriber already installed");
    }

    // 2. Prometheus
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::warn!("Metrics recorder not installed: {}", e),
    }

    metrics::describe_counter!(EVENTS_APPENDED, "Events newly appended to the log");
    metrics::describe_counter!(EVENTS_DUPLICATE, "Submitted events that were already stored");
    metrics::describe_counter!(SYNC_REQUESTS, "Sync requests processed");
    metrics::describe_histogram!(SYNC_DURATION, "Time spent processing a sync request");
    metrics::describe_counter!(FANOUT_SEND_FAILURES, "Real-time sends that failed or timed out");
    metrics::describe_gauge!(WS_CONNECTIONS, "Registered real-time connections");

    metrics::gauge!("caseline_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
