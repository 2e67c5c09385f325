use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use cronwarden_supervisor::Supervisor;
use std::sync::Arc;

use crate::http::{health, jobs};

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    /// Bearer token required by write endpoints; `None` leaves them open.
    pub token: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, token: Option<String>) -> Self {
        Self {
            supervisor,
            token,
            started_at: Utc::now(),
        }
    }
}

/// Assemble the control-surface router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{name}", get(jobs::get_job))
        .route("/jobs/{name}/start", post(jobs::start_job))
        .route("/jobs/{name}/stop", post(jobs::stop_job))
        .route("/jobs/{name}/restart", post(jobs::restart_job))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
