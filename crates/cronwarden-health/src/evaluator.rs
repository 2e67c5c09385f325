//! `HealthEvaluator`: runs every job's checks on its own timer.
//!
//! A round snapshots the state table, checks each running job that has `eval`
//! expressions (plus the global expressions) concurrently, then writes the
//! results back. A slow or hanging check only delays its own job's result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronwarden_core::{config::CronwardenConfig, JobDefinition};
use cronwarden_supervisor::{HealthResult, InstanceId, Supervisor};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::probe::HealthProbe;

/// Results of one evaluation round.
#[derive(Debug, Default)]
pub struct HealthRound {
    pub jobs: Vec<(String, HealthResult)>,
    pub global: Option<HealthResult>,
    /// Jobs recycled because of a failed check.
    pub restarted: Vec<String>,
}

pub struct HealthEvaluator {
    supervisor: Arc<Supervisor>,
    probe: Arc<dyn HealthProbe>,
    root: PathBuf,
    global: Vec<String>,
    interval: Duration,
    default_timeout: Duration,
}

impl HealthEvaluator {
    pub fn new(
        supervisor: Arc<Supervisor>,
        probe: Arc<dyn HealthProbe>,
        config: &CronwardenConfig,
    ) -> Self {
        Self {
            supervisor,
            probe,
            root: config.root_directory(),
            global: config.health_check_eval.clone(),
            interval: Duration::from_secs(config.scheduler.health_check_interval_secs.max(1)),
            default_timeout: Duration::from_secs(config.scheduler.health_check_timeout_secs),
        }
    }

    /// True when there is nothing to check, so the timer need not run.
    pub fn is_idle(&self) -> bool {
        self.global.is_empty() && self.supervisor.catalog().iter().all(|d| d.eval.is_empty())
    }

    /// Run every due check once and record the results.
    pub async fn run_once(&self, now: DateTime<Utc>) -> HealthRound {
        let table = self.supervisor.snapshot(now).await;
        let targets: Vec<(&JobDefinition, InstanceId)> = self
            .supervisor
            .catalog()
            .iter()
            .filter(|def| !def.eval.is_empty())
            .filter_map(|def| {
                let row = table.get(&def.name)?;
                match (row.is_running(), row.instance) {
                    (true, Some(instance)) => Some((def, instance)),
                    _ => None,
                }
            })
            .collect();

        let job_checks = join_all(targets.iter().map(|(def, _)| {
            let timeout = def
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(self.default_timeout);
            self.evaluate(&def.eval, def.working_directory(&self.root), timeout, now)
        }));
        let global_check = async {
            if self.global.is_empty() {
                None
            } else {
                Some(
                    self.evaluate(&self.global, self.root.clone(), self.default_timeout, now)
                        .await,
                )
            }
        };
        let (job_results, global) = tokio::join!(job_checks, global_check);

        let mut round = HealthRound::default();
        for ((def, instance), result) in targets.into_iter().zip(job_results) {
            if !result.passed() {
                warn!(
                    job = %def.name,
                    detail = result.detail.as_deref().unwrap_or(""),
                    "health check failed"
                );
            }
            match self
                .supervisor
                .record_health(&def.name, instance, result.clone())
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job = %def.name, %instance, "job replaced during check; result dropped")
                }
                Err(e) => error!(job = %def.name, error = %e, "could not record health result"),
            }
            if !result.passed() && def.restart_if_unhealthy {
                match self.supervisor.restart_instance(&def.name, instance, now).await {
                    Ok(true) => {
                        info!(job = %def.name, "restarted unhealthy job");
                        round.restarted.push(def.name.clone());
                    }
                    Ok(false) => {}
                    Err(e) => error!(job = %def.name, error = %e, "restart of unhealthy job failed"),
                }
            }
            round.jobs.push((def.name.clone(), result));
        }

        if let Some(result) = global {
            if !result.passed() {
                warn!(
                    detail = result.detail.as_deref().unwrap_or(""),
                    "global health check failed"
                );
            }
            self.supervisor.record_global_health(result.clone()).await;
            round.global = Some(result);
        }
        round
    }

    /// Timer loop. Runs until `shutdown` broadcasts `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.is_idle() {
            info!("no health checks configured; health evaluator idle");
            return;
        }
        info!(interval_secs = self.interval.as_secs(), "health evaluator started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("health evaluator shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// All expressions must pass; the first failure is the recorded detail.
    async fn evaluate(
        &self,
        exprs: &[String],
        cwd: PathBuf,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> HealthResult {
        for expr in exprs {
            if let Err(e) = self.probe.check(expr, &cwd, timeout).await {
                return HealthResult::fail(now, format!("{expr}: {e}"));
            }
        }
        HealthResult::pass(now)
    }
}
