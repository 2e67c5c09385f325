//! In-memory [`Launcher`] for tests: processes "run" until the test finishes
//! them or they are signalled.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cronwarden_core::JobDefinition;
use futures_util::future::FutureExt;
use tokio::sync::oneshot;

use crate::launcher::{LaunchedProcess, Launcher, StopSignal};

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    running: HashMap<u32, oneshot::Sender<Option<i32>>>,
    launches: Vec<(String, u32)>,
    signals: Vec<(u32, StopSignal)>,
    failing: HashSet<String>,
    stubborn: HashSet<String>,
    unsignalable: HashSet<String>,
}

#[derive(Default)]
pub struct FakeLauncher {
    state: Mutex<FakeState>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every launch of `job` fail with `NotFound` until allowed again.
    pub fn fail_launches_of(&self, job: &str) {
        self.state().failing.insert(job.to_string());
    }

    pub fn allow_launches_of(&self, job: &str) {
        self.state().failing.remove(job);
    }

    /// Processes of `job` keep running on SIGTERM; only SIGKILL ends them.
    pub fn ignore_terminate(&self, job: &str) {
        self.state().stubborn.insert(job.to_string());
    }

    /// Make signalling any process of `job` fail with `PermissionDenied`.
    pub fn fail_signals_of(&self, job: &str) {
        self.state().unsignalable.insert(job.to_string());
    }

    /// Job names in launch order.
    pub fn launches(&self) -> Vec<String> {
        self.state().launches.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn launch_count(&self, job: &str) -> usize {
        self.state().launches.iter().filter(|(n, _)| n == job).count()
    }

    pub fn signals(&self) -> Vec<(u32, StopSignal)> {
        self.state().signals.clone()
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.state().running.contains_key(&pid)
    }

    /// End process `pid` with `code`. Returns false if it was not running.
    pub fn finish(&self, pid: u32, code: Option<i32>) -> bool {
        match self.state().running.remove(&pid) {
            Some(tx) => {
                let _ = tx.send(code);
                true
            }
            None => false,
        }
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, def: &JobDefinition, _root: &Path) -> io::Result<LaunchedProcess> {
        let mut state = self.state();
        if state.failing.contains(&def.name) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: command not found", def.command),
            ));
        }
        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        let (tx, rx) = oneshot::channel();
        state.running.insert(pid, tx);
        state.launches.push((def.name.clone(), pid));
        Ok(LaunchedProcess {
            pid,
            exit: rx.map(|r| r.unwrap_or(None)).boxed(),
        })
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()> {
        let mut state = self.state();
        let job = state
            .launches
            .iter()
            .find(|(_, p)| *p == pid)
            .map(|(job, _)| job.clone());
        if job.as_ref().is_some_and(|j| state.unsignalable.contains(j)) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("kill {pid}: operation not permitted"),
            ));
        }
        state.signals.push((pid, signal));
        let ignored = signal == StopSignal::Terminate
            && job.as_ref().is_some_and(|j| state.stubborn.contains(j));
        if ignored {
            return Ok(());
        }
        if let Some(tx) = state.running.remove(&pid) {
            let code = match signal {
                StopSignal::Terminate => -15,
                StopSignal::Kill => -9,
            };
            let _ = tx.send(Some(code));
        }
        Ok(())
    }
}
