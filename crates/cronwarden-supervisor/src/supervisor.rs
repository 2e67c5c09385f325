//! `Supervisor`: owns the job state table and is the only writer of job
//! phases.
//!
//! All mutation goes through one `tokio::sync::RwLock`. The tick loop takes
//! the write lock for a whole pass via [`Supervisor::lock`]; liveness watchers
//! and control commands take it per call. Nothing awaits while holding it:
//! spawning and signalling are synchronous fire-and-forget calls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronwarden_core::{Catalog, JobDefinition};
use futures_util::future::BoxFuture;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SupervisorError},
    launcher::{LaunchedProcess, Launcher, StopSignal},
    table::StateTable,
    types::{ExitReason, HealthResult, InstanceId, JobPhase, JobRuntimeState, ScheduleMemo},
};

/// What a single [`SupervisorGuard::evaluate_job`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// NotStarted -> Running
    Launched,
    /// Exited -> Running
    Relaunched,
    /// Running -> Running with a new instance (restart-if-found).
    Recycled,
    /// Exited -> NotStarted, no further auto-launch.
    WentDormant,
    /// Would launch, but dependencies are not satisfied.
    Deferred,
    /// A launch was attempted and the process could not be created.
    SpawnFailed,
    /// A recycle could not signal the running instance. The row is `Exited`
    /// with `last_error` set and no replacement was launched.
    StopFailed,
    Unchanged,
}

struct Inner {
    table: StateTable,
    /// Signalled instances whose exit has not been observed yet, with their pid.
    lingering: HashMap<InstanceId, u32>,
}

pub struct Supervisor {
    catalog: Arc<Catalog>,
    inner: RwLock<Inner>,
    launcher: Arc<dyn Launcher>,
    root: PathBuf,
    stop_grace: Duration,
    me: Weak<Supervisor>,
}

impl Supervisor {
    /// Build a supervisor with one `NotStarted` row per catalog entry.
    ///
    /// `root` is the working directory for relative commands; `stop_grace` is
    /// how long a terminated process gets before SIGKILL.
    pub fn new(
        catalog: Arc<Catalog>,
        launcher: Arc<dyn Launcher>,
        root: PathBuf,
        stop_grace: Duration,
    ) -> Arc<Self> {
        let table = StateTable::from_catalog(&catalog);
        Arc::new_cyclic(|me| Self {
            catalog,
            inner: RwLock::new(Inner {
                table,
                lingering: HashMap::new(),
            }),
            launcher,
            root,
            stop_grace,
            me: me.clone(),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Exclusive access to the state table for a sequence of operations.
    pub async fn lock(&self) -> SupervisorGuard<'_> {
        SupervisorGuard {
            sup: self,
            inner: self.inner.write().await,
        }
    }

    /// Point-in-time copy of every row. The read lock is held only for the copy.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> StateTable {
        let mut table = self.inner.read().await.table.clone();
        table.refresh_settled(&self.catalog, now);
        table
    }

    pub async fn state(&self, name: &str) -> Result<JobRuntimeState> {
        self.definition(name)?;
        let inner = self.inner.read().await;
        inner.table.get(name).cloned().ok_or_else(|| not_found(name))
    }

    // -----------------------------------------------------------------------
    // Control commands
    // -----------------------------------------------------------------------

    /// Launch `name` now unless it is already running. Clears `dormant`.
    pub async fn start(&self, name: &str, now: DateTime<Utc>) -> Result<JobRuntimeState> {
        let def = self.definition(name)?;
        let mut guard = self.lock().await;
        let row = guard.row_mut(name)?;
        row.dormant = false;
        if row.is_running() {
            debug!(job = %name, "start requested for running job; nothing to do");
            return Ok(row.clone());
        }
        info!(job = %name, "start requested");
        guard.launch(def, now)?;
        guard.row(name)
    }

    /// Terminate `name` if running and hold it until an explicit start.
    ///
    /// The hold applies whatever the phase: a stopped `NotStarted` or `Exited`
    /// job is not launched by its schedule or restart policy either.
    pub async fn stop(&self, name: &str, now: DateTime<Utc>) -> Result<JobRuntimeState> {
        self.definition(name)?;
        let mut guard = self.lock().await;
        let row = guard.row_mut(name)?;
        row.dormant = true;
        if !row.is_running() {
            debug!(
                job = %name,
                phase = %row.phase,
                "stop requested for idle job; held without signalling"
            );
            return Ok(row.clone());
        }
        info!(job = %name, "stop requested");
        guard.terminate(name, now)?;
        guard.row(name)
    }

    /// Stop then immediately relaunch, regardless of schedule.
    pub async fn restart(&self, name: &str, now: DateTime<Utc>) -> Result<JobRuntimeState> {
        let def = self.definition(name)?;
        let mut guard = self.lock().await;
        guard.row_mut(name)?.dormant = false;
        info!(job = %name, "restart requested");
        if guard.row_mut(name)?.is_running() {
            guard.terminate(name, now)?;
        }
        guard.launch(def, now)?;
        guard.row(name)
    }

    /// Recycle `name` only if `instance` is still its current running instance.
    /// Returns whether a restart happened.
    pub async fn restart_instance(
        &self,
        name: &str,
        instance: InstanceId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let def = self.definition(name)?;
        let mut guard = self.lock().await;
        let row = guard.row_mut(name)?;
        if !row.is_running() || row.instance != Some(instance) {
            return Ok(false);
        }
        guard.terminate(name, now)?;
        guard.launch(def, now)?;
        Ok(true)
    }

    /// Terminate every running job. Used on daemon shutdown.
    pub async fn shutdown(&self, now: DateTime<Utc>) {
        let mut guard = self.lock().await;
        let running: Vec<String> = guard
            .inner
            .table
            .rows()
            .iter()
            .filter(|r| r.is_running())
            .map(|r| r.name.clone())
            .collect();
        for name in running {
            if let Err(e) = guard.terminate(&name, now) {
                error!(job = %name, error = %e, "failed to stop job on shutdown");
            }
        }
        info!("all supervised jobs signalled");
    }

    /// Wait until every signalled process has been seen to exit, or `limit`
    /// passes. Returns false on timeout.
    pub async fn drain(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.inner.read().await.lingering.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // -----------------------------------------------------------------------
    // Liveness and health
    // -----------------------------------------------------------------------

    /// Record that `instance` of `name` has ended.
    ///
    /// Reports for a superseded instance are ignored. Returns true when the
    /// row moved from `Running` to `Exited`.
    pub async fn observe_exit(
        &self,
        name: &str,
        instance: InstanceId,
        exit_code: Option<i32>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.inner.write().await;
        inner.lingering.remove(&instance);
        let Some(row) = inner.table.get_mut(name) else {
            return false;
        };
        if row.instance != Some(instance) {
            debug!(job = %name, %instance, "exit of superseded instance ignored");
            return false;
        }
        match row.phase {
            JobPhase::Running => {
                row.phase = JobPhase::Exited;
                row.exit_code = exit_code;
                row.exited_at = Some(now);
                row.exit_reason = Some(ExitReason::ProcessExited);
                row.settled = false;
                row.pid = None;
                info!(job = %name, ?exit_code, "job exited");
                true
            }
            // Stopped by an operator; keep the phase, fill in the code.
            JobPhase::Exited if row.exit_code.is_none() => {
                row.exit_code = exit_code;
                false
            }
            _ => false,
        }
    }

    /// Store a check result taken against `instance`. A result for an
    /// instance that has since been replaced is dropped; returns whether it
    /// was stored.
    pub async fn record_health(
        &self,
        name: &str,
        instance: InstanceId,
        result: HealthResult,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let row = inner.table.get_mut(name).ok_or_else(|| not_found(name))?;
        if row.instance != Some(instance) {
            debug!(job = %name, %instance, "health result for superseded instance dropped");
            return Ok(false);
        }
        row.health = Some(result);
        Ok(true)
    }

    pub async fn record_global_health(&self, result: HealthResult) {
        self.inner.write().await.table.global_health = Some(result);
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn definition(&self, name: &str) -> Result<&JobDefinition> {
        self.catalog.get(name).ok_or_else(|| not_found(name))
    }

    fn watch(&self, name: String, instance: InstanceId, exit: BoxFuture<'static, Option<i32>>) {
        let weak = self.me.clone();
        tokio::spawn(async move {
            let code = exit.await;
            if let Some(sup) = weak.upgrade() {
                sup.observe_exit(&name, instance, code, Utc::now()).await;
            }
        });
    }

    fn schedule_kill(&self, name: String, instance: InstanceId) {
        let weak = self.me.clone();
        let grace = self.stop_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(sup) = weak.upgrade() else { return };
            let pid = sup.inner.write().await.lingering.remove(&instance);
            if let Some(pid) = pid {
                warn!(job = %name, pid, "job ignored SIGTERM; sending SIGKILL");
                if let Err(e) = sup.launcher.signal(pid, StopSignal::Kill) {
                    error!(job = %name, pid, error = %e, "SIGKILL failed");
                }
            }
        });
    }
}

/// Write access to the state table, held across a sequence of operations.
pub struct SupervisorGuard<'a> {
    sup: &'a Supervisor,
    inner: RwLockWriteGuard<'a, Inner>,
}

impl SupervisorGuard<'_> {
    pub fn table(&self) -> &StateTable {
        &self.inner.table
    }

    pub fn refresh_settled(&mut self, now: DateTime<Utc>) {
        self.inner.table.refresh_settled(&self.sup.catalog, now);
    }

    /// The schedule evaluator's private memo on `name`'s row.
    pub fn schedule_memo_mut(&mut self, name: &str) -> Option<&mut ScheduleMemo> {
        self.inner.table.get_mut(name).map(|row| &mut row.schedule)
    }

    /// Apply the restart-policy transition table once for a due job.
    ///
    /// | phase       | condition                          | result        |
    /// |-------------|------------------------------------|---------------|
    /// | NotStarted  | not dormant, deps satisfied        | Launched      |
    /// | Running     | restart_if_found, deps satisfied   | Recycled      |
    /// | Running     | recycle could not signal           | StopFailed    |
    /// | Running     | otherwise                          | Unchanged     |
    /// | Exited      | spawn failed or restart_if_finished| Relaunched    |
    /// | Exited      | otherwise (not dormant)            | WentDormant   |
    pub fn evaluate_job(
        &mut self,
        def: &JobDefinition,
        satisfied: bool,
        now: DateTime<Utc>,
    ) -> Transition {
        let Some(row) = self.inner.table.get_mut(&def.name) else {
            return Transition::Unchanged;
        };
        let name = def.name.as_str();

        match row.phase {
            JobPhase::Launching => Transition::Unchanged,
            JobPhase::NotStarted if row.dormant => Transition::Unchanged,
            JobPhase::NotStarted => {
                if !satisfied {
                    debug!(job = %name, "due but dependencies unsatisfied; deferred");
                    return Transition::Deferred;
                }
                self.launch_as(def, now, Transition::Launched)
            }
            JobPhase::Running if !def.restart_if_found => Transition::Unchanged,
            JobPhase::Running => {
                if !satisfied {
                    debug!(job = %name, "recycle due but dependencies unsatisfied; deferred");
                    return Transition::Deferred;
                }
                info!(job = %name, "recycling running job (restart_if_found)");
                if let Err(e) = self.terminate(name, now) {
                    error!(job = %name, error = %e, "could not stop job for recycle");
                    return Transition::StopFailed;
                }
                self.launch_as(def, now, Transition::Recycled)
            }
            JobPhase::Exited if row.dormant => Transition::Unchanged,
            JobPhase::Exited => {
                let spawn_failed = row.exit_reason == Some(ExitReason::SpawnFailed);
                if spawn_failed || def.restart_if_finished {
                    if !satisfied {
                        debug!(job = %name, "relaunch due but dependencies unsatisfied; deferred");
                        return Transition::Deferred;
                    }
                    return self.launch_as(def, now, Transition::Relaunched);
                }
                row.phase = JobPhase::NotStarted;
                row.dormant = true;
                info!(job = %name, "job finished and restart_if_finished is off; dormant");
                Transition::WentDormant
            }
        }
    }

    fn launch_as(&mut self, def: &JobDefinition, now: DateTime<Utc>, ok: Transition) -> Transition {
        match self.launch(def, now) {
            Ok(_) => ok,
            Err(_) => Transition::SpawnFailed,
        }
    }

    /// Spawn a new instance of `def`. On failure the row is left in `Exited`
    /// with `SpawnFailed` and no instance; the next due evaluation tries again.
    fn launch(&mut self, def: &JobDefinition, now: DateTime<Utc>) -> Result<InstanceId> {
        let name = def.name.as_str();
        self.row_mut(name)?.phase = JobPhase::Launching;

        let launched = self.sup.launcher.launch(def, &self.sup.root);
        let row = self.row_mut(name)?;
        match launched {
            Ok(LaunchedProcess { pid, exit }) => {
                let instance = InstanceId::new();
                if row.started_at.is_some() {
                    row.restart_count += 1;
                }
                row.phase = JobPhase::Running;
                row.instance = Some(instance);
                row.pid = Some(pid);
                row.started_at = Some(now);
                row.exited_at = None;
                row.exit_code = None;
                row.exit_reason = None;
                row.last_error = None;
                row.settled = def.delay == 0;
                info!(job = %name, pid, %instance, "job launched");
                self.sup.watch(name.to_string(), instance, exit);
                Ok(instance)
            }
            Err(e) => {
                row.phase = JobPhase::Exited;
                row.instance = None;
                row.pid = None;
                row.settled = false;
                row.exited_at = Some(now);
                row.exit_code = None;
                row.exit_reason = Some(ExitReason::SpawnFailed);
                row.last_error = Some(e.to_string());
                warn!(job = %name, error = %e, "job failed to launch");
                Err(SupervisorError::Spawn {
                    job: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// SIGTERM the current instance and mark the row `Exited` right away.
    /// The row ends up `Exited` even when signalling fails.
    fn terminate(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let row = self.row_mut(name)?;
        let target = row.pid.zip(row.instance);
        row.phase = JobPhase::Exited;
        row.pid = None;
        row.settled = false;
        row.exited_at = Some(now);
        row.exit_code = None;
        row.exit_reason = Some(ExitReason::Stopped);

        let Some((pid, instance)) = target else {
            return Ok(());
        };
        if let Err(e) = self.sup.launcher.signal(pid, StopSignal::Terminate) {
            let row = self.row_mut(name)?;
            row.last_error = Some(format!("SIGTERM failed: {e}"));
            error!(job = %name, pid, error = %e, "failed to signal job");
            return Err(SupervisorError::Signal {
                job: name.to_string(),
                reason: e.to_string(),
            });
        }
        info!(job = %name, pid, "job signalled to stop");
        self.inner.lingering.insert(instance, pid);
        self.sup.schedule_kill(name.to_string(), instance);
        Ok(())
    }

    fn row_mut(&mut self, name: &str) -> Result<&mut JobRuntimeState> {
        self.inner.table.get_mut(name).ok_or_else(|| not_found(name))
    }

    fn row(&self, name: &str) -> Result<JobRuntimeState> {
        self.inner.table.get(name).cloned().ok_or_else(|| not_found(name))
    }
}

fn not_found(name: &str) -> SupervisorError {
    SupervisorError::JobNotFound {
        name: name.to_string(),
    }
}
