//! Tool listing and liveness endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::interfaces::web::AppState;

pub async fn list_tools(State(state): State<AppState>) -> Json<serde_json::Value> {
    let specs = state.coordinator.list_specs();
    let total_count = specs.len();
    Json(json!({
        "tools": specs,
        "total_count": total_count,
    }))
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}
