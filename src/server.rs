use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::metrics::report;
use crate::middleware::{track_metrics, Dispatcher};

/// Shared state of the demo host.
pub struct AppState {
    pub metrics: Dispatcher,
}

/// Demo host: a handful of routes with the metrics middleware mounted.
pub fn create_router(state: Arc<AppState>) -> Router {
    let metrics = state.metrics.clone();

    Router::new()
        // ── Demo endpoints ──────────────────────────────────────
        .route("/", get(handlers::index))
        .route("/api/echo/:msg", get(handlers::echo))
        .route("/api/slow/:ms", get(handlers::slow))
        .route("/api/stream", get(handlers::stream_chunks))
        // ── Local delivery statistics ───────────────────────────
        .route("/api/metrics", get(report::get_report))
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn_with_state(metrics, track_metrics))
        .layer(CorsLayer::permissive())
}
