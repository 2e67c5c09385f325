//! Error types for the cronwarden-supervisor crate.

use thiserror::Error;

/// Errors surfaced by supervisor operations.
///
/// None of these leave a job half-launched: on `Spawn` or `Signal` the job's
/// row is already in `Exited`.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The name does not exist in the catalog.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// Process creation failed (missing binary, permissions, bad cwd).
    #[error("Failed to launch {job}: {reason}")]
    Spawn { job: String, reason: String },

    /// Sending a termination signal failed.
    #[error("Failed to signal {job}: {reason}")]
    Signal { job: String, reason: String },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SupervisorError>;
