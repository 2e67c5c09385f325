use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: daemon liveness, returns version and job counts.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let table = state.supervisor.snapshot(Utc::now()).await;
    let running = table.rows().iter().filter(|r| r.is_running()).count();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": table.rows().len(),
        "running": running,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}
