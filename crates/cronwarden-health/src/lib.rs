//! `cronwarden-health`: periodic health checks, independent of the tick loop.
//!
//! Each check expression is an opaque predicate run through a [`HealthProbe`]
//! with a bounded timeout. Results are stamped and stored on the job's row;
//! they only feed a restart when the job sets `restart_if_unhealthy`.

pub mod error;
pub mod evaluator;
pub mod probe;

pub use error::{HealthError, Result};
pub use evaluator::{HealthEvaluator, HealthRound};
pub use probe::{HealthProbe, ShellProbe};
