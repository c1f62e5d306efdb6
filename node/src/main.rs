// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use caseline_node::config::NodeConfig;
use caseline_node::server::build_router;
use caseline_node::state::AppState;
use caseline_node::telemetry::init_telemetry;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    init_telemetry();

    let cfg = NodeConfig::from_env();
    tracing::info!(
        "Initializing Caseline node: bind {}, log {:?}, closed cases {:?}",
        cfg.bind_addr,
        cfg.event_log_path,
        cfg.closed_policy
    );

    let state = match AppState::from_config(&cfg) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to open event log: {}", e);
            std::process::exit(1);
        }
    };

    let registry = state.registry.clone();
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = TcpListener::bind(cfg.bind_addr).await.unwrap();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
        shutdown.cancel();
        registry.shutdown();
    });

    if let Err(e) = serve.await {
        tracing::error!("Server error: {}", e);
    }
}
