use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::interface_adapters::net::ws_handler;
use crate::interface_adapters::state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    // Wire the HTTP routes to their handlers.
    Router::new()
        .route("/v0/signaling", get(ws_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"healthy": true}))
}

// Ready only once TURN credentials have been fetched at least once, so
// load balancers do not route players that could not complete ICE.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.credentials.has_fetched() {
        (StatusCode::OK, Json(json!({"ready": true})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"ready": false})))
    }
}
