//! API router configuration.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::handlers::{
    api_info, complete, connect, delete_file, delete_schedule, disconnect, execute, health,
    list_files, list_schedules, list_sessions, read_file, schedule_shutdown, upload, write_file,
    AppState,
};
use crate::error::BridgeError;

/// Create the API router with the given state.
pub fn create_router_with_state(state: AppState) -> Router {
    let terminal_routes = Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/sessions", get(list_sessions))
        .route("/execute", post(execute))
        .route("/complete", post(complete))
        .route("/file", get(read_file).post(write_file))
        .route("/files", post(list_files))
        .route("/upload", post(upload))
        .route("/delete", post(delete_file));

    let power_routes = Router::new()
        .route("/schedule-shutdown", post(schedule_shutdown))
        .route("/schedules", get(list_schedules))
        .route("/schedules/delete", post(delete_schedule));

    let api = Router::new()
        .route("/", get(api_info))
        .nest("/terminal", terminal_routes)
        .nest("/power", power_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(state.body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Stop on Ctrl-C after in-flight requests finish.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            graceful_shutdown: true,
        }
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 3000)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Start the API server with custom state.
///
/// With graceful shutdown enabled, Ctrl-C stops accepting connections,
/// lets in-flight requests finish and then closes every open session.
pub async fn serve_with_state(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let addr = config.bind_address();
    let registry = state.registry.clone();
    let router = create_router_with_state(state);

    info!("Starting shell-bridge API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(BridgeError::Io)?;

    let served = if config.graceful_shutdown {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    } else {
        axum::serve(listener, router).await
    };
    served.map_err(BridgeError::Io)?;

    let closed = registry.close_all().await;
    info!(sessions = closed, "server stopped");
    Ok(())
}
