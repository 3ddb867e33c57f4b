mod auth;
mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod ws;

use config::Config;
use db::dbnotes::PgStore;
use routes::create_app;
use state::AppState;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use ws::hub::{Hub, HubHandle};

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration
    let config_result = Config::load();
    let config = config_result.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    let default_filter = format!(
        "note_sync={},tower_http=debug,axum::rejection=trace,info",
        config.log_level
    );
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    info!("Starting server...");
    if let Err(e) = &config_result {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
    }
    if config.jwt_secret.is_none() {
        warn!("No JWT secret configured - every authenticated request will be refused");
    }

    // Initialize database connection
    let Some(db_url) = config.database_url() else {
        error!("No database configured, set DB_URL or DB_NAME");
        return;
    };
    let store = match PgStore::connect(&db_url, config.db_max_connections).await {
        Ok(store) => {
            info!("Database initialized successfully");
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    // Start the realtime hub
    let (hub, hub_worker) = Hub::start();

    let state = AppState::new(&config, hub.clone(), store.clone(), store);
    let app_routes = create_app(state, &config);

    // Start the HTTP/API server
    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            return;
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/api/v1/ws/notes/{{id}}", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await
    {
        error!("Server error: {}", e);
    }

    hub.shutdown().await;
    if let Err(e) = hub_worker.await {
        error!("Hub worker failed: {}", e);
    }
    info!("Server stopped");
}

/// Resolve on Ctrl-C or SIGTERM. The hub is stopped first so every open
/// socket is closed and the server can drain.
async fn shutdown_signal(hub: HubHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, closing realtime sessions");
    hub.shutdown().await;
}
