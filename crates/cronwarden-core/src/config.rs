use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::JobDefinition;

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STOP_GRACE_SECS: u64 = 5;

/// Top-level config (cronwarden.toml + CRONWARDEN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CronwardenConfig {
    /// Working directory for launched jobs. Defaults to the daemon's cwd.
    #[serde(default)]
    pub root_directory: Option<PathBuf>,
    /// Shorthand for `control.port`; wins when both are set.
    #[serde(default)]
    pub port: Option<u16>,
    /// Health-check expressions not tied to any job.
    #[serde(default)]
    pub health_check_eval: Vec<String>,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// When set, write endpoints require `Authorization: Bearer <token>`.
    pub token: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            token: None,
        }
    }
}

/// Which wall clock cron expressions are matched against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTimezone {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub health_check_timeout_secs: u64,
    /// Seconds between SIGTERM and SIGKILL when stopping a job.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    #[serde(default)]
    pub timezone: ScheduleTimezone,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            health_check_interval_secs: default_health_interval(),
            health_check_timeout_secs: default_health_timeout(),
            stop_grace_secs: default_stop_grace(),
            timezone: ScheduleTimezone::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_health_interval() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS
}
fn default_health_timeout() -> u64 {
    DEFAULT_HEALTH_CHECK_TIMEOUT_SECS
}
fn default_stop_grace() -> u64 {
    DEFAULT_STOP_GRACE_SECS
}

impl CronwardenConfig {
    /// Load config from a TOML file with CRONWARDEN_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. CRONWARDEN_CONFIG env var
    ///   3. ~/.cronwarden/cronwarden.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CRONWARDEN_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        if !std::path::Path::new(&path).exists() {
            return Err(crate::error::CoreError::Config(format!(
                "config file not found: {path}"
            )));
        }

        Self::extract(Figment::new().merge(Toml::file(&path)))
    }

    /// Parse a TOML document directly, still honouring env overrides.
    pub fn from_toml_str(document: &str) -> crate::error::Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(document)))
    }

    fn extract(figment: Figment) -> crate::error::Result<Self> {
        figment
            .merge(Env::prefixed("CRONWARDEN_").ignore(&["config"]).split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    pub fn control_port(&self) -> u16 {
        self.port.unwrap_or(self.control.port)
    }

    pub fn root_directory(&self) -> PathBuf {
        self.root_directory
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronwarden/cronwarden.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
        root_directory = "/srv/trader"
        port = 9090
        health_check_eval = ["test -S /tmp/tws.sock"]

        [scheduler]
        tick_interval_secs = 20
        timezone = "utc"

        [[jobs]]
        name = "tws"
        description = "broker gateway"
        command = "bin/tws.sh"
        arguments = "--paper --port 7497"
        start = "0 8 * * mon-fri"
        start_on_pycron_start = true
        restart_if_finished = true
        delay = 30

        [[jobs]]
        name = "trader"
        command = "python3"
        arguments = "-m trader.service"
        start = "*/5 9-16 * * 1-5"
        depends_on = ["tws"]
        eval = ["curl -sf localhost:8080/health"]
        timeout = 3
        restart_if_unhealthy = true
    "#;

    #[test]
    fn parses_full_document() {
        let config = CronwardenConfig::from_toml_str(DOCUMENT).unwrap();
        assert_eq!(config.root_directory(), PathBuf::from("/srv/trader"));
        assert_eq!(config.control_port(), 9090);
        assert_eq!(config.control.bind, DEFAULT_BIND);
        assert_eq!(config.scheduler.tick_interval_secs, 20);
        assert_eq!(config.scheduler.timezone, ScheduleTimezone::Utc);
        assert_eq!(config.scheduler.stop_grace_secs, DEFAULT_STOP_GRACE_SECS);
        assert_eq!(config.health_check_eval.len(), 1);

        let tws = &config.jobs[0];
        assert!(tws.start_on_boot);
        assert!(tws.restart_if_finished);
        assert!(!tws.restart_if_found);
        assert_eq!(tws.delay, 30);
        assert_eq!(tws.argv(), vec!["--paper", "--port", "7497"]);

        let trader = &config.jobs[1];
        assert_eq!(trader.depends_on, vec!["tws"]);
        assert_eq!(trader.timeout, Some(3));
        assert!(trader.restart_if_unhealthy);
        assert!(trader.description.is_empty());
    }

    #[test]
    fn defaults_apply_to_empty_document() {
        let config = CronwardenConfig::from_toml_str("").unwrap();
        assert!(config.jobs.is_empty());
        assert_eq!(config.control_port(), DEFAULT_PORT);
        assert_eq!(config.scheduler.tick_interval_secs, DEFAULT_TICK_INTERVAL_SECS);
        assert_eq!(config.scheduler.timezone, ScheduleTimezone::Local);
    }

    #[test]
    fn bad_cron_expression_is_a_config_error() {
        let err = CronwardenConfig::from_toml_str(
            r#"
            [[jobs]]
            name = "x"
            command = "true"
            start = "61 * * * *"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("minute"), "{err}");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = CronwardenConfig::load(Some("/nonexistent/cronwarden.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
