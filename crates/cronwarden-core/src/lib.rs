//! `cronwarden-core`: configuration, job definitions and the validated job
//! catalog shared by every other cronwarden crate.

pub mod catalog;
pub mod config;
pub mod cron;
pub mod error;
pub mod types;

pub use catalog::Catalog;
pub use cron::{CronExpr, CronField};
pub use error::{CatalogError, CoreError, CronParseError, Result};
pub use types::JobDefinition;
