//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AppError;
use crate::server::handlers::{
    build_logs_handler, build_status_handler, builds_handler, deploy_handler, health_handler,
    version_handler,
};
use crate::server::socket::build_logs_ws_handler;
use crate::server::state::ServerState;

/// Build the router
pub fn router(options: &ServerOptions, state: Arc<ServerState>) -> Router {
    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/deploy", post(deploy_handler))
        .route("/builds", get(builds_handler))
        .route("/app/{slug}/build", get(build_status_handler))
        .route("/app/{slug}/build_logs", get(build_logs_handler))
        .route("/app/{slug}/build_logs/ws", get(build_logs_ws_handler))
        // State and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(options.max_bundle_bytes))
        .layer(TraceLayer::new_for_http());

    if options.cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the HTTP server. Returns the bound address, which differs from the
/// configured one when port 0 was requested.
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), AppError>>), AppError> {
    let app = router(options, state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::ServerError(e.to_string()))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AppError::ServerError(e.to_string()))
    });

    Ok((local_addr, handle))
}
