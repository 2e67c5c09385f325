//! Health-check execution.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::error::{HealthError, Result};

/// Diagnostic output kept from a failing check.
const MAX_DETAIL_CHARS: usize = 512;

/// Runs one health-check expression to completion or timeout.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, expr: &str, cwd: &Path, timeout: Duration) -> Result<()>;
}

/// Runs each expression with `sh -c` in the job's working directory. Exit
/// status 0 passes; anything else, or running past the timeout, fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellProbe;

#[async_trait]
impl HealthProbe for ShellProbe {
    async fn check(&self, expr: &str, cwd: &Path, timeout: Duration) -> Result<()> {
        debug!(%expr, cwd = %cwd.display(), "running health check");
        let child = AsyncCommand::new("sh")
            .arg("-c")
            .arg(expr)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // On timeout the wait future is dropped, which kills the child.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_elapsed) => {
                return Err(HealthError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(HealthError::Failed {
            code: output.status.code(),
            output: clip(text.trim()),
        })
    }
}

fn clip(text: &str) -> String {
    match text.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const ROOT: &str = "/";

    #[tokio::test]
    async fn zero_exit_passes() {
        ShellProbe
            .check("true", Path::new(ROOT), Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_output() {
        let err = ShellProbe
            .check("echo db down >&2; exit 2", Path::new(ROOT), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            HealthError::Failed { code, output } => {
                assert_eq!(code, Some(2));
                assert_eq!(output, "db down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_check_times_out() {
        let started = std::time::Instant::now();
        let err = ShellProbe
            .check("sleep 10", Path::new(ROOT), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn runs_in_the_given_directory() {
        ShellProbe
            .check("test \"$(pwd)\" = /", Path::new(ROOT), Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let long = "é".repeat(MAX_DETAIL_CHARS + 10);
        let clipped = clip(&long);
        assert!(clipped.ends_with("..."));
        assert_eq!(clipped.chars().count(), MAX_DETAIL_CHARS + 3);
        assert_eq!(clip("short"), "short");
    }
}
