use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronwarden_core::config::{ScheduleTimezone, SchedulerConfig};
use cronwarden_supervisor::{Supervisor, Transition};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::{resolver, schedule};

/// One job's outcome in a boot or tick pass.
pub type PassOutcome = Vec<(String, Transition)>;

/// Tick driver: one boot pass, then a schedule pass every `tick_interval`.
pub struct SchedulerEngine {
    supervisor: Arc<Supervisor>,
    tick_interval: Duration,
    timezone: ScheduleTimezone,
}

impl SchedulerEngine {
    pub fn new(supervisor: Arc<Supervisor>, config: &SchedulerConfig) -> Self {
        Self {
            supervisor,
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            timezone: config.timezone,
        }
    }

    /// Launch `start_on_boot` jobs, dependencies first. Runs before the first tick.
    pub async fn boot(&self, now: DateTime<Utc>) -> PassOutcome {
        self.pass(now, |def, memo| schedule::is_due_on_boot(def, memo, now))
            .await
    }

    /// Evaluate every job whose schedule matches `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> PassOutcome {
        let tz = self.timezone;
        self.pass(now, |def, memo| schedule::is_due(def, memo, now, tz))
            .await
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            timezone = ?self.timezone,
            "scheduler engine started"
        );
        self.boot(Utc::now()).await;

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    /// Hold the supervisor lock for the whole pass so due check, memo write,
    /// dependency check and transition happen as one step per job.
    async fn pass<F>(&self, now: DateTime<Utc>, mut due: F) -> PassOutcome
    where
        F: FnMut(&cronwarden_core::JobDefinition, &mut cronwarden_supervisor::ScheduleMemo) -> bool,
    {
        let catalog = self.supervisor.catalog();
        let mut guard = self.supervisor.lock().await;
        guard.refresh_settled(now);

        let mut outcome = Vec::new();
        for def in catalog.startup_order() {
            let fired = guard
                .schedule_memo_mut(&def.name)
                .is_some_and(|memo| due(def, memo));
            if !fired {
                continue;
            }
            let waiting_on = resolver::unsatisfied(def, guard.table());
            if !waiting_on.is_empty() {
                debug!(job = %def.name, ?waiting_on, "dependencies not satisfied");
            }
            let transition = guard.evaluate_job(def, waiting_on.is_empty(), now);
            debug!(job = %def.name, ?transition, "job evaluated");
            outcome.push((def.name.clone(), transition));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cronwarden_core::{Catalog, CronExpr, JobDefinition};
    use cronwarden_supervisor::fake::FakeLauncher;
    use cronwarden_supervisor::JobPhase;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap()
    }

    fn secs(n: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(n)
    }

    fn job(name: &str) -> JobDefinition {
        JobDefinition::new(name, "true", CronExpr::every_minute())
    }

    fn engine(defs: Vec<JobDefinition>) -> (SchedulerEngine, Arc<Supervisor>, Arc<FakeLauncher>) {
        let catalog = Arc::new(Catalog::load(defs).unwrap());
        let fake = Arc::new(FakeLauncher::new());
        let sup = Supervisor::new(catalog, fake.clone(), "/tmp".into(), Duration::from_secs(5));
        let config = SchedulerConfig {
            timezone: ScheduleTimezone::Utc,
            ..SchedulerConfig::default()
        };
        (SchedulerEngine::new(sup.clone(), &config), sup, fake)
    }

    fn outcome_of(outcome: &PassOutcome, name: &str) -> Option<Transition> {
        outcome.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
    }

    #[tokio::test]
    async fn dependent_waits_for_settled_dependency() {
        let mut a = job("a");
        a.start_on_boot = true;
        a.delay = 5;
        let mut b = job("b");
        b.start_on_boot = true;
        b.depends_on = vec!["a".into()];
        b.delay = 5;
        let (engine, sup, fake) = engine(vec![b, a]);

        let boot = engine.boot(t0()).await;
        assert_eq!(outcome_of(&boot, "a"), Some(Transition::Launched));
        assert_eq!(outcome_of(&boot, "b"), Some(Transition::Deferred));
        assert_eq!(sup.state("b").await.unwrap().phase, JobPhase::NotStarted);

        // Same minute: the boot fire already claimed it.
        assert!(engine.tick(secs(30)).await.is_empty());

        let next = engine.tick(secs(60)).await;
        assert_eq!(outcome_of(&next, "a"), Some(Transition::Unchanged));
        assert_eq!(outcome_of(&next, "b"), Some(Transition::Launched));
        assert_eq!(fake.launches(), vec!["a", "b"]);

        let b_state = sup.state("b").await.unwrap();
        assert_eq!(b_state.phase, JobPhase::Running);
        assert!(!b_state.settled);
    }

    #[tokio::test]
    async fn dependent_due_before_delay_elapses_does_not_launch() {
        let mut a = job("a");
        a.delay = 90;
        let mut b = job("b");
        b.depends_on = vec!["a".into()];
        let (engine, sup, _) = engine(vec![a, b]);

        let first = engine.tick(t0()).await;
        assert_eq!(outcome_of(&first, "a"), Some(Transition::Launched));
        assert_eq!(outcome_of(&first, "b"), Some(Transition::Deferred));

        let second = engine.tick(secs(60)).await;
        assert_eq!(outcome_of(&second, "b"), Some(Transition::Deferred));
        assert_eq!(sup.state("b").await.unwrap().phase, JobPhase::NotStarted);

        let third = engine.tick(secs(120)).await;
        assert_eq!(outcome_of(&third, "b"), Some(Transition::Launched));
    }

    #[tokio::test]
    async fn zero_delay_dependency_satisfies_in_the_same_pass() {
        let mut b = job("b");
        b.depends_on = vec!["a".into()];
        let (engine, _, fake) = engine(vec![b, job("a")]);

        let pass = engine.tick(t0()).await;
        assert_eq!(outcome_of(&pass, "a"), Some(Transition::Launched));
        assert_eq!(outcome_of(&pass, "b"), Some(Transition::Launched));
        assert_eq!(fake.launches(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn running_job_found_by_schedule_is_left_alone() {
        let (engine, sup, fake) = engine(vec![job("c")]);
        engine.tick(t0()).await;
        let before = sup.state("c").await.unwrap();

        let pass = engine.tick(secs(60)).await;
        assert_eq!(outcome_of(&pass, "c"), Some(Transition::Unchanged));
        let after = sup.state("c").await.unwrap();
        assert_eq!(after.phase, JobPhase::Running);
        assert_eq!(after.started_at, before.started_at);
        assert_eq!(fake.launch_count("c"), 1);
    }

    #[tokio::test]
    async fn repeated_ticks_in_one_minute_fire_once() {
        let mut recycled = job("r");
        recycled.restart_if_found = true;
        let (engine, _, fake) = engine(vec![recycled]);

        for s in [0, 10, 20, 59] {
            engine.tick(secs(s)).await;
        }
        assert_eq!(fake.launch_count("r"), 1);
        engine.tick(secs(60)).await;
        assert_eq!(fake.launch_count("r"), 2);
    }

    #[tokio::test]
    async fn sparse_schedule_misses_window_when_unsatisfied() {
        let mut a = job("a");
        a.delay = 120;
        let mut hourly = JobDefinition::new("hourly", "true", CronExpr::parse("30 * * * *").unwrap());
        hourly.depends_on = vec!["a".into()];
        let (engine, sup, _) = engine(vec![a, hourly]);

        let pass = engine.tick(t0()).await;
        assert_eq!(outcome_of(&pass, "hourly"), Some(Transition::Deferred));

        // a settles, but hourly does not match again until 10:30.
        for m in 1..10 {
            let pass = engine.tick(secs(60 * m)).await;
            assert_eq!(outcome_of(&pass, "hourly"), None);
        }
        assert_eq!(sup.state("hourly").await.unwrap().phase, JobPhase::NotStarted);
    }

    #[tokio::test]
    async fn non_boot_jobs_wait_for_their_schedule() {
        let mut nightly = JobDefinition::new("nightly", "true", CronExpr::parse("0 2 * * *").unwrap());
        nightly.restart_if_finished = true;
        let (engine, _, fake) = engine(vec![nightly]);

        assert!(engine.boot(t0()).await.is_empty());
        assert!(engine.tick(secs(60)).await.is_empty());
        assert_eq!(fake.launch_count("nightly"), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let mut a = job("a");
        a.start_on_boot = true;
        let (engine, sup, _) = engine(vec![a]);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !sup.state("a").await.unwrap().is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
