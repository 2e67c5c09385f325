use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job catalog: {0}")]
    Catalog(#[from] CatalogError),
}

/// Fatal catalog validation failures. Any of these aborts startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate job name `{name}`")]
    DuplicateName { name: String },

    #[error("job `{job}` depends on unknown job `{dependency}`")]
    UnknownDependency { job: String, dependency: String },

    /// `path` starts and ends with the same job, e.g. `["a", "b", "a"]`.
    #[error("dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("job name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid cron expression `{expr}`: {reason}")]
pub struct CronParseError {
    pub expr: String,
    pub reason: String,
}

impl CronParseError {
    pub(crate) fn new(expr: &str, reason: impl Into<String>) -> Self {
        Self {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
