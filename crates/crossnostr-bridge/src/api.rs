//! Operator-facing HTTP endpoints.

use axum::{routing::get, Extension, Json, Router};
use crossnostr_relay::RelayPool;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared with the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub relays: RelayPool,
}

/// Liveness probe.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Connection health of every configured relay.
async fn relays_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let relays = state.relays.status().await;
    Json(json!({
        "relays": relays,
        "reconnecting": state.relays.reconnects_in_flight(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/relays", get(relays_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
