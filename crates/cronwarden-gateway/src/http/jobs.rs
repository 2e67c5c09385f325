//! Job endpoints: read the state snapshot, issue start/stop/restart.
//!
//! Reads:  `GET /jobs`, `GET /jobs/{name}`
//! Writes: `POST /jobs/{name}/start|stop|restart`, guarded by
//! `Authorization: Bearer <token>` when `control.token` is configured.
//!
//! Every response is built from one supervisor snapshot, so a listing never
//! mixes rows from different moments.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use cronwarden_core::JobDefinition;
use cronwarden_scheduler::resolver;
use cronwarden_supervisor::{
    ExitReason, HealthResult, InstanceId, JobPhase, JobRuntimeState, StateTable, SupervisorError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{api_error, ApiError};
use crate::app::AppState;

/// One job as reported by the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub phase: JobPhase,
    pub settled: bool,
    pub dormant: bool,
    pub pid: Option<u32>,
    pub instance: Option<InstanceId>,
    pub started_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub exit_reason: Option<ExitReason>,
    pub restart_count: u32,
    pub last_error: Option<String>,
    /// Dependencies that are not running-and-settled right now.
    pub waiting_on: Vec<String>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub health: Option<HealthResult>,
}

impl JobStatusView {
    pub fn new(def: &JobDefinition, row: &JobRuntimeState, table: &StateTable) -> Self {
        Self {
            name: row.name.clone(),
            description: def.description.clone(),
            schedule: def.start.to_string(),
            phase: row.phase,
            settled: row.settled,
            dormant: row.dormant,
            pid: row.pid,
            instance: row.instance,
            started_at: row.started_at,
            exited_at: row.exited_at,
            exit_code: row.exit_code,
            exit_reason: row.exit_reason,
            restart_count: row.restart_count,
            last_error: row.last_error.clone(),
            waiting_on: resolver::unsatisfied(def, table)
                .into_iter()
                .map(String::from)
                .collect(),
            last_fired_at: row
                .schedule
                .last_fired_minute
                .and_then(|m| DateTime::from_timestamp(m.saturating_mul(60), 0)),
            health: row.health.clone(),
        }
    }
}

/// Response of `GET /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub jobs: Vec<JobStatusView>,
    pub global_health: Option<HealthResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    Start,
    Stop,
    Restart,
}

impl JobCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            JobCommand::Start => "start",
            JobCommand::Stop => "stop",
            JobCommand::Restart => "restart",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<JobsSnapshot> {
    let now = Utc::now();
    let table = state.supervisor.snapshot(now).await;
    let catalog = state.supervisor.catalog();
    let jobs = table
        .rows()
        .iter()
        .filter_map(|row| {
            let def = catalog.get(&row.name)?;
            Some(JobStatusView::new(def, row, &table))
        })
        .collect();
    Json(JobsSnapshot {
        generated_at: now,
        jobs,
        global_health: table.global_health.clone(),
    })
}

/// GET /jobs/{name}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let table = state.supervisor.snapshot(Utc::now()).await;
    view_of(&state, &table, &name).map(Json)
}

/// POST /jobs/{name}/start: no-op when already running.
pub async fn start_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    run_command(&state, &headers, &name, JobCommand::Start).await
}

/// POST /jobs/{name}/stop: no-op when not running.
pub async fn stop_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    run_command(&state, &headers, &name, JobCommand::Stop).await
}

/// POST /jobs/{name}/restart
pub async fn restart_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    run_command(&state, &headers, &name, JobCommand::Restart).await
}

async fn run_command(
    state: &AppState,
    headers: &HeaderMap,
    name: &str,
    command: JobCommand,
) -> Result<Json<JobStatusView>, ApiError> {
    if !check_auth(state, headers) {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Unauthorized. Set 'Authorization: Bearer <your-token>' header.",
        ));
    }

    let now = Utc::now();
    let supervisor = &state.supervisor;
    let result = match command {
        JobCommand::Start => supervisor.start(name, now).await,
        JobCommand::Stop => supervisor.stop(name, now).await,
        JobCommand::Restart => supervisor.restart(name, now).await,
    };
    match result {
        Ok(_) => info!(job = %name, %command, "control command applied"),
        Err(SupervisorError::JobNotFound { .. }) => {
            return Err(api_error(StatusCode::NOT_FOUND, format!("unknown job: {name}")));
        }
        Err(e) => {
            warn!(job = %name, %command, error = %e, "control command failed");
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    }

    let table = supervisor.snapshot(Utc::now()).await;
    view_of(state, &table, name).map(Json)
}

fn view_of(state: &AppState, table: &StateTable, name: &str) -> Result<JobStatusView, ApiError> {
    let not_found = || api_error(StatusCode::NOT_FOUND, format!("unknown job: {name}"));
    let def = state.supervisor.catalog().get(name).ok_or_else(not_found)?;
    let row = table.get(name).ok_or_else(not_found)?;
    Ok(JobStatusView::new(def, row, table))
}

/// Returns true if the request may issue write commands.
fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.token {
        None => true,
        Some(expected) => extract_bearer(headers).is_some_and(|t| t == expected.as_str()),
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_router;
    use crate::http::ErrorBody;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use cronwarden_core::{Catalog, CronExpr};
    use cronwarden_supervisor::fake::FakeLauncher;
    use cronwarden_supervisor::Supervisor;
    use serde::de::DeserializeOwned;
    use std::time::Duration;
    use tower::ServiceExt;

    fn job(name: &str) -> JobDefinition {
        JobDefinition::new(name, "true", CronExpr::every_minute())
    }

    fn setup(token: Option<&str>) -> (Router, Arc<Supervisor>, Arc<FakeLauncher>) {
        let mut api = job("api");
        api.description = "public api".into();
        api.depends_on = vec!["db".into()];
        let mut db = job("db");
        db.delay = 3600;
        let catalog = Arc::new(Catalog::load(vec![db, api]).unwrap());
        let fake = Arc::new(FakeLauncher::new());
        let sup = Supervisor::new(catalog, fake.clone(), "/tmp".into(), Duration::from_secs(5));
        let state = Arc::new(AppState::new(sup.clone(), token.map(String::from)));
        (build_router(state), sup, fake)
    }

    async fn send<T: DeserializeOwned>(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
    ) -> (StatusCode, T) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let response = app
            .clone()
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn lists_every_job_with_dependency_detail() {
        let (app, _, _) = setup(None);
        let (status, snapshot): (_, JobsSnapshot) = send(&app, "GET", "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = snapshot.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["db", "api"]);

        let api = &snapshot.jobs[1];
        assert_eq!(api.phase, JobPhase::NotStarted);
        assert_eq!(api.waiting_on, vec!["db"]);
        assert_eq!(api.description, "public api");
        assert_eq!(api.schedule, "* * * * *");
        assert!(snapshot.global_health.is_none());
    }

    #[tokio::test]
    async fn start_stop_restart_round_trip() {
        let (app, _, fake) = setup(None);

        let (status, started): (_, JobStatusView) =
            send(&app, "POST", "/jobs/db/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started.phase, JobPhase::Running);
        assert!(!started.settled, "delay has not elapsed");
        assert!(started.started_at.is_some());

        // Start on a running job is a no-op.
        let (_, again): (_, JobStatusView) = send(&app, "POST", "/jobs/db/start", None).await;
        assert_eq!(again.instance, started.instance);
        assert_eq!(fake.launch_count("db"), 1);

        let (status, stopped): (_, JobStatusView) =
            send(&app, "POST", "/jobs/db/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stopped.phase, JobPhase::Exited);
        assert_eq!(stopped.exit_reason, Some(ExitReason::Stopped));

        // Stop twice is still a success.
        let (status, _): (_, JobStatusView) = send(&app, "POST", "/jobs/db/stop", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, restarted): (_, JobStatusView) =
            send(&app, "POST", "/jobs/db/restart", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(restarted.phase, JobPhase::Running);
        assert!(restarted.started_at >= started.started_at);
        assert_ne!(restarted.instance, started.instance);
    }

    #[tokio::test]
    async fn unknown_job_is_a_client_error() {
        let (app, sup, _) = setup(None);
        let before = sup.snapshot(Utc::now()).await;

        let (status, body): (_, ErrorBody) = send(&app, "GET", "/jobs/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.error.contains("ghost"));

        let (status, _): (_, ErrorBody) = send(&app, "POST", "/jobs/ghost/restart", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let after = sup.snapshot(Utc::now()).await;
        assert_eq!(before.rows().len(), after.rows().len());
        assert!(after.rows().iter().all(|r| r.phase == JobPhase::NotStarted));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_server_error_with_consistent_state() {
        let (app, _, fake) = setup(None);
        fake.fail_launches_of("db");

        let (status, body): (_, ErrorBody) = send(&app, "POST", "/jobs/db/start", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.error.contains("Failed to launch db"));

        let (_, view): (_, JobStatusView) = send(&app, "GET", "/jobs/db", None).await;
        assert_eq!(view.phase, JobPhase::Exited);
        assert_eq!(view.exit_reason, Some(ExitReason::SpawnFailed));
        assert!(view.last_error.is_some());
    }

    #[tokio::test]
    async fn writes_require_token_when_configured() {
        let (app, _, fake) = setup(Some("s3cret"));

        let (status, _): (_, ErrorBody) = send(&app, "POST", "/jobs/db/start", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _): (_, ErrorBody) =
            send(&app, "POST", "/jobs/db/start", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(fake.launch_count("db"), 0);

        // Reads stay open.
        let (status, _): (_, JobsSnapshot) = send(&app, "GET", "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, view): (_, JobStatusView) =
            send(&app, "POST", "/jobs/db/start", Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view.phase, JobPhase::Running);
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let (app, sup, _) = setup(None);
        sup.start("db", Utc::now()).await.unwrap();
        let (status, body): (_, serde_json::Value) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["jobs"], 2);
        assert_eq!(body["running"], 1);
    }
}
