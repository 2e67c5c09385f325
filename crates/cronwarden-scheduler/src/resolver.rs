//! Dependency satisfaction against the current state table.
//!
//! Read-only: nothing here ever writes another job's state.

use cronwarden_core::JobDefinition;
use cronwarden_supervisor::StateTable;

/// Dependencies of `def` that are not running-and-settled right now,
/// in declaration order.
pub fn unsatisfied<'a>(def: &'a JobDefinition, states: &StateTable) -> Vec<&'a str> {
    def.depends_on
        .iter()
        .filter(|dep| !states.get(dep).is_some_and(|row| row.is_satisfied_dependency()))
        .map(String::as_str)
        .collect()
}

pub fn is_satisfied(def: &JobDefinition, states: &StateTable) -> bool {
    def.depends_on
        .iter()
        .all(|dep| states.get(dep).is_some_and(|row| row.is_satisfied_dependency()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cronwarden_core::{Catalog, CronExpr};
    use cronwarden_supervisor::fake::FakeLauncher;
    use cronwarden_supervisor::Supervisor;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(name: &str, deps: &[&str], delay: u64) -> JobDefinition {
        let mut def = JobDefinition::new(name, "true", CronExpr::every_minute());
        def.depends_on = deps.iter().map(|d| d.to_string()).collect();
        def.delay = delay;
        def
    }

    #[tokio::test]
    async fn satisfied_only_when_running_and_settled() {
        let catalog = Arc::new(
            Catalog::load(vec![
                job("db", &[], 10),
                job("cache", &[], 0),
                job("api", &["db", "cache"], 0),
            ])
            .unwrap(),
        );
        let sup = Supervisor::new(
            catalog.clone(),
            Arc::new(FakeLauncher::new()),
            "/tmp".into(),
            Duration::from_secs(1),
        );
        let api = catalog.get("api").unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let table = sup.snapshot(t0).await;
        assert!(!is_satisfied(api, &table));
        assert_eq!(unsatisfied(api, &table), vec!["db", "cache"]);

        sup.start("db", t0).await.unwrap();
        sup.start("cache", t0).await.unwrap();
        let table = sup.snapshot(t0 + chrono::Duration::seconds(5)).await;
        assert_eq!(unsatisfied(api, &table), vec!["db"]);

        let table = sup.snapshot(t0 + chrono::Duration::seconds(10)).await;
        assert!(is_satisfied(api, &table));
        assert!(unsatisfied(api, &table).is_empty());
    }

    #[tokio::test]
    async fn no_dependencies_is_always_satisfied() {
        let catalog = Arc::new(Catalog::load(vec![job("solo", &[], 0)]).unwrap());
        let sup = Supervisor::new(
            catalog.clone(),
            Arc::new(FakeLauncher::new()),
            "/tmp".into(),
            Duration::from_secs(1),
        );
        let table = sup.snapshot(Utc::now()).await;
        assert!(is_satisfied(catalog.get("solo").unwrap(), &table));
    }
}
