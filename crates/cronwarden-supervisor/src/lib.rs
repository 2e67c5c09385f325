//! `cronwarden-supervisor`: job state table and process lifecycle.
//!
//! # Overview
//!
//! The [`Supervisor`] owns one [`JobRuntimeState`] row per catalog job and is
//! the only component that launches, signals or re-labels processes. The
//! schedule evaluator decides *when* a job is due and calls
//! [`SupervisorGuard::evaluate_job`]; the restart policy decides *what* that
//! means for the job's current phase.
//!
//! # Phases
//!
//! | Phase        | Meaning                                              |
//! |--------------|------------------------------------------------------|
//! | `NotStarted` | Never launched, or finished and dormant              |
//! | `Launching`  | Spawn in progress (only visible inside one call)     |
//! | `Running`    | Process alive; `settled` once its delay has elapsed  |
//! | `Exited`     | Process gone: exited, stopped, or failed to spawn    |

pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod launcher;
pub mod supervisor;
pub mod table;
pub mod types;

pub use error::{Result, SupervisorError};
pub use launcher::{LaunchedProcess, Launcher, OsLauncher, StopSignal};
pub use supervisor::{Supervisor, SupervisorGuard, Transition};
pub use table::StateTable;
pub use types::{
    ExitReason, HealthResult, HealthStatus, InstanceId, JobPhase, JobRuntimeState, ScheduleMemo,
};
