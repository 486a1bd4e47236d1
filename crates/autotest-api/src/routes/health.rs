//! Health check endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once grading containers can reach the rendezvous listener.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.rendezvous.local_addr() {
        Some(addr) => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "rendezvous": addr.to_string() })),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "starting" })),
        ),
    }
}
