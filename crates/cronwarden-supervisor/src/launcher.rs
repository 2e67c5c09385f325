//! Process creation and signalling.
//!
//! The supervisor never touches OS processes directly; it goes through a
//! [`Launcher`] so the state machine can be driven by a fake in tests.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use cronwarden_core::JobDefinition;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

/// A freshly spawned process.
pub struct LaunchedProcess {
    pub pid: u32,
    /// Resolves with the exit code once the process ends. `None` when no code
    /// is available; on Unix a signal death reports the negated signal number.
    pub exit: BoxFuture<'static, Option<i32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

/// Spawns job processes and delivers signals to them.
pub trait Launcher: Send + Sync {
    /// Start `def` in its working directory. Fire-and-forget: returns as soon
    /// as the process exists.
    fn launch(&self, def: &JobDefinition, root: &Path) -> io::Result<LaunchedProcess>;

    /// Deliver `signal` to `pid`. A process that is already gone is not an error.
    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()>;
}

/// Launches real OS processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl Launcher for OsLauncher {
    fn launch(&self, def: &JobDefinition, root: &Path) -> io::Result<LaunchedProcess> {
        let program = resolve_program(&def.command, root);
        let cwd = def.working_directory(root);
        debug!(job = %def.name, program = %program.display(), cwd = %cwd.display(), "spawning");

        let mut child = AsyncCommand::new(&program)
            .args(def.argv())
            .current_dir(&cwd)
            .envs(&def.env)
            .stdin(Stdio::null())
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("process exited before its pid was read"))?;

        let name = def.name.clone();
        let exit = async move {
            match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(job = %name, pid, error = %e, "wait on job process failed");
                    None
                }
            }
        }
        .boxed();

        Ok(LaunchedProcess { pid, exit })
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()> {
        send_signal(pid, signal)
    }
}

/// Commands containing a path separator resolve against `root`; bare names
/// are looked up on `PATH` by the OS.
fn resolve_program(command: &str, root: &Path) -> PathBuf {
    let path = Path::new(command);
    if path.is_relative() && path.components().count() > 1 {
        root.join(path)
    } else {
        path.to_path_buf()
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|s| -s))
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> io::Result<()> {
    let raw_pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
    let sig = match signal {
        StopSignal::Terminate => libc::SIGTERM,
        StopSignal::Kill => libc::SIGKILL,
    };
    // Safety: kill(2) takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::kill(raw_pid, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: StopSignal) -> io::Result<()> {
    std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()
        .map(|_| ())
}
