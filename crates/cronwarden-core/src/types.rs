//! Job definitions as read from the configuration document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;

/// An externally-launched program with a schedule, dependencies and restart
/// policy. Immutable once the catalog is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique key across the catalog.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Executable path or name. Relative paths resolve against the working directory.
    pub command: String,
    /// Argument string, split on whitespace with simple quoting.
    #[serde(default)]
    pub arguments: String,
    /// When the job is due.
    pub start: CronExpr,
    /// Treat the job as due once at supervisor boot, regardless of `start`.
    #[serde(default, alias = "start_on_pycron_start")]
    pub start_on_boot: bool,
    /// Recycle an already-running instance when the schedule matches.
    #[serde(default)]
    pub restart_if_found: bool,
    /// Relaunch an exited instance when the schedule matches.
    #[serde(default)]
    pub restart_if_finished: bool,
    /// Restart the job when one of its health checks fails.
    #[serde(default)]
    pub restart_if_unhealthy: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Seconds after launch before the job counts as a satisfied dependency.
    #[serde(default)]
    pub delay: u64,
    /// Health-check expressions evaluated while the job runs.
    #[serde(default)]
    pub eval: Vec<String>,
    /// Health-check timeout override, in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Working directory override, relative to the root directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl JobDefinition {
    /// A job with every optional field at its default.
    pub fn new(name: impl Into<String>, command: impl Into<String>, start: CronExpr) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            command: command.into(),
            arguments: String::new(),
            start,
            start_on_boot: false,
            restart_if_found: false,
            restart_if_finished: false,
            restart_if_unhealthy: false,
            depends_on: Vec::new(),
            delay: 0,
            eval: Vec::new(),
            timeout: None,
            directory: None,
            env: BTreeMap::new(),
        }
    }

    pub fn settle_delay(&self) -> chrono::Duration {
        i64::try_from(self.delay)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// The argument string split into argv entries.
    pub fn argv(&self) -> Vec<String> {
        split_arguments(&self.arguments)
    }

    /// Directory the process is launched in.
    pub fn working_directory(&self, root: &Path) -> PathBuf {
        match &self.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }
}

/// Whitespace split that keeps single- or double-quoted runs together.
pub fn split_arguments(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_arguments() {
        assert_eq!(split_arguments("  --port 4001 -v "), vec!["--port", "4001", "-v"]);
        assert!(split_arguments("").is_empty());
    }

    #[test]
    fn keeps_quoted_runs_together() {
        assert_eq!(
            split_arguments(r#"--name "trader east" --msg 'a b' x"y z""#),
            vec!["--name", "trader east", "--msg", "a b", "xy z"]
        );
        assert_eq!(split_arguments(r#"--empty """#), vec!["--empty", ""]);
    }

    #[test]
    fn working_directory_resolution() {
        let root = Path::new("/srv/trader");
        let mut job = JobDefinition::new("a", "run.sh", CronExpr::every_minute());
        assert_eq!(job.working_directory(root), PathBuf::from("/srv/trader"));
        job.directory = Some(PathBuf::from("bin"));
        assert_eq!(job.working_directory(root), PathBuf::from("/srv/trader/bin"));
        job.directory = Some(PathBuf::from("/opt/x"));
        assert_eq!(job.working_directory(root), PathBuf::from("/opt/x"));
    }
}
