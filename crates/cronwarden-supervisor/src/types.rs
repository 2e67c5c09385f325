//! Runtime state records owned by the supervisor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobPhase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a supervised job.
///
/// `Running` is split into unsettled/settled by [`JobRuntimeState::settled`]
/// rather than by a separate variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    NotStarted,
    Launching,
    Running,
    Exited,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::NotStarted => "not_started",
            JobPhase::Launching => "launching",
            JobPhase::Running => "running",
            JobPhase::Exited => "exited",
        };
        write!(f, "{s}")
    }
}

/// Why a job is in `Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The process ended on its own.
    ProcessExited,
    /// An operator stopped it through the control surface.
    Stopped,
    /// The process could not be created.
    SpawnFailed,
}

// ---------------------------------------------------------------------------
// InstanceId
// ---------------------------------------------------------------------------

/// Identifies one launch of a job.
///
/// Exit observations carry the id of the instance they belong to, so a late
/// report from a recycled instance never touches its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Generate a fresh, time-ordered instance id (UUIDv7).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Pass,
    Fail,
}

/// Outcome of one health-check round, stamped with when it was evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    /// Diagnostic text from the failing (or last) check.
    pub detail: Option<String>,
}

impl HealthResult {
    pub fn pass(checked_at: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Pass,
            checked_at,
            detail: None,
        }
    }

    pub fn fail(checked_at: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Fail,
            checked_at,
            detail: Some(detail.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == HealthStatus::Pass
    }
}

// ---------------------------------------------------------------------------
// JobRuntimeState
// ---------------------------------------------------------------------------

/// Mutable state of one job. One row per catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRuntimeState {
    pub name: String,
    pub phase: JobPhase,
    pub instance: Option<InstanceId>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub exit_reason: Option<ExitReason>,
    /// True once the post-start delay has elapsed for the current instance.
    pub settled: bool,
    /// Set when the job must not be auto-launched until an operator starts it.
    pub dormant: bool,
    /// Launches after the first one.
    pub restart_count: u32,
    pub last_error: Option<String>,
    /// Written only by the schedule evaluator.
    pub schedule: ScheduleMemo,
    /// Written only by the health-check evaluator.
    pub health: Option<HealthResult>,
}

/// Per-job record of the last minute for which the schedule fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleMemo {
    /// Minutes since the Unix epoch.
    pub last_fired_minute: Option<i64>,
}

impl JobRuntimeState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: JobPhase::NotStarted,
            instance: None,
            pid: None,
            started_at: None,
            exited_at: None,
            exit_code: None,
            exit_reason: None,
            settled: false,
            dormant: false,
            restart_count: 0,
            last_error: None,
            schedule: ScheduleMemo::default(),
            health: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == JobPhase::Running
    }

    /// Running and past its post-start delay.
    pub fn is_satisfied_dependency(&self) -> bool {
        self.is_running() && self.settled
    }
}
