//! Read-only HTTP API: Axum server for the presentation layer.
//!
//! Serves current consensus, line history, closing lines, recent gate
//! decisions, budget usage and performance as JSON. Every handler is
//! side-effect free. CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Start the API server.
///
/// This spawns a background task and returns immediately.
pub fn spawn_dashboard(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Read-only API starting on http://localhost:{port}");

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(port, error = %e, "Failed to bind API port");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/consensus/:game_id/:market/:side", get(routes::get_consensus))
        .route("/api/history/:game_id/:market/:side", get(routes::get_history))
        .route("/api/closing/:game_id", get(routes::get_closing))
        .route("/api/decisions", get(routes::get_decisions))
        .route("/api/budget", get(routes::get_budget))
        .route("/api/picks", get(routes::get_picks))
        .route("/api/performance", get(routes::get_performance))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
