//! The job state table: one [`JobRuntimeState`] row per catalog entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use cronwarden_core::Catalog;
use serde::Serialize;
use tracing::info;

use crate::types::{HealthResult, JobRuntimeState};

/// Rows in catalog declaration order plus the global health result.
#[derive(Debug, Clone, Serialize)]
pub struct StateTable {
    rows: Vec<JobRuntimeState>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    pub global_health: Option<HealthResult>,
}

impl StateTable {
    /// One `NotStarted` row per job.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let rows: Vec<JobRuntimeState> = catalog
            .iter()
            .map(|def| JobRuntimeState::new(def.name.clone()))
            .collect();
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.name.clone(), i))
            .collect();
        Self {
            rows,
            index,
            global_health: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&JobRuntimeState> {
        self.index.get(name).map(|&i| &self.rows[i])
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut JobRuntimeState> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.rows[i]),
            None => None,
        }
    }

    pub fn rows(&self) -> &[JobRuntimeState] {
        &self.rows
    }

    /// Flip `settled` on every running row whose post-start delay has elapsed.
    pub fn refresh_settled(&mut self, catalog: &Catalog, now: DateTime<Utc>) {
        for row in self.rows.iter_mut().filter(|r| r.is_running() && !r.settled) {
            let (Some(def), Some(started_at)) = (catalog.get(&row.name), row.started_at) else {
                continue;
            };
            let settles_at = started_at.checked_add_signed(def.settle_delay());
            if settles_at.is_some_and(|t| t <= now) {
                row.settled = true;
                info!(job = %row.name, "job settled");
            }
        }
    }
}
