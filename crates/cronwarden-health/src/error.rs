use thiserror::Error;

/// Why a health-check expression did not pass.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The expression ran and reported failure.
    #[error("check failed with exit code {code:?}: {output}")]
    Failed { code: Option<i32>, output: String },

    #[error("check timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The check could not be started at all.
    #[error("check could not run: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HealthError>;
