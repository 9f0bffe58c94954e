//! HTTP server configuration and request routing.
//!
//! Axum router with the queue endpoints behind basic authentication, plus
//! an unauthenticated health check. Middleware order: timeout enforcement,
//! request tracing, then authentication on the `/api` subtree.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use integrator_core::{storage::Storage, Destinations};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{handlers, middleware::auth::basic_auth};

/// Credentials the API's basic authentication accepts.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    /// Accepted username.
    pub username: String,
    /// Accepted password.
    pub password: String,
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Repository access.
    pub storage: Arc<Storage>,
    /// The destination snapshot, for the explicit reload endpoint.
    pub destinations: Arc<Destinations>,
    /// Accepted API credentials.
    pub credentials: Arc<ApiCredentials>,
}

/// Creates the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/queue",
            get(handlers::queue::list_requests).post(handlers::queue::enqueue_request),
        )
        .route(
            "/queue/{uid}",
            get(handlers::queue::get_request).delete(handlers::queue::delete_request),
        )
        .route("/servers/reload", post(handlers::servers::reload_servers))
        .layer(axum::middleware::from_fn_with_state(state.clone(), basic_auth));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP server, serving until the process is stopped.
///
/// # Errors
///
/// Returns `std::io::Error` when the port cannot be bound or serving fails.
pub async fn start_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "API server listening");
    axum::serve(listener, create_router(state)).await
}
