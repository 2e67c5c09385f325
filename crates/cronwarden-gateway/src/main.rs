use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use cronwarden_core::{
    config::{CronwardenConfig, DEFAULT_BIND, DEFAULT_PORT},
    Catalog,
};
use cronwarden_health::{HealthEvaluator, ShellProbe};
use cronwarden_scheduler::SchedulerEngine;
use cronwarden_supervisor::{OsLauncher, Supervisor};
use tracing::{error, info, warn};

mod app;
mod client;
mod http;

use client::ControlClient;
use http::jobs::{JobCommand, JobStatusView};

/// cronwarden - keeps scheduled and long-running jobs alive
#[derive(Parser)]
#[command(name = "cronwarden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (overrides CRONWARDEN_CONFIG and ~/.cronwarden/cronwarden.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Control-surface URL for client commands (default: from config)
    #[arg(long, global = true, env = "CRONWARDEN_URL")]
    url: Option<String>,

    /// Bearer token for start/stop/restart (default: control.token from config)
    #[arg(long, global = true, env = "CRONWARDEN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor daemon in the foreground
    Run,
    /// Validate the configuration and print the startup order
    Check,
    /// Check that a daemon is reachable
    Ping,
    /// List every job on a running daemon
    List,
    /// Show one job's full status
    Show { job: String },
    /// Start a job now (no-op if running)
    Start { job: String },
    /// Stop a job and hold it until started again
    Stop { job: String },
    /// Stop then relaunch a job
    Restart { job: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cronwarden=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Run => run_daemon(load_config(&cli)?).await,
        Commands::Check => check(&load_config(&cli)?),
        Commands::Ping => {
            let health = control_client(&cli)?.health().await?;
            println!(
                "cronwarden {} up {}s: {} job(s), {} running",
                health["version"].as_str().unwrap_or("?"),
                health["uptime_secs"],
                health["jobs"],
                health["running"]
            );
            Ok(())
        }
        Commands::List => list(&control_client(&cli)?).await,
        Commands::Show { job } => {
            let view = control_client(&cli)?.show(job).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Commands::Start { job } => command(&cli, job, JobCommand::Start).await,
        Commands::Stop { job } => command(&cli, job, JobCommand::Stop).await,
        Commands::Restart { job } => command(&cli, job, JobCommand::Restart).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CronwardenConfig> {
    let path = cli.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    CronwardenConfig::load(path.as_deref()).context("failed to load configuration")
}

/// Build the client from flags, falling back to the config file, then defaults.
fn control_client(cli: &Cli) -> anyhow::Result<ControlClient> {
    let config = load_config(cli).ok();
    let url = cli.url.clone().unwrap_or_else(|| match &config {
        Some(c) => format!("http://{}:{}", c.control.bind, c.control_port()),
        None => format!("http://{DEFAULT_BIND}:{DEFAULT_PORT}"),
    });
    let token = cli
        .token
        .clone()
        .or_else(|| config.and_then(|c| c.control.token));
    ControlClient::new(url, token)
}

async fn run_daemon(config: CronwardenConfig) -> anyhow::Result<()> {
    // A bad catalog aborts startup before anything is launched.
    let catalog = Arc::new(Catalog::load(config.jobs.clone()).context("invalid job catalog")?);
    let order: Vec<&str> = catalog.startup_order().map(|d| d.name.as_str()).collect();
    info!(jobs = catalog.len(), ?order, "job catalog loaded");

    let root = config.root_directory();
    let stop_grace = Duration::from_secs(config.scheduler.stop_grace_secs);
    info!(root = %root.display(), "working directory");
    let supervisor = Supervisor::new(catalog, Arc::new(OsLauncher), root, stop_grace);

    let bind = (config.control.bind.as_str(), config.control_port());
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("could not bind control surface on {}:{}", bind.0, bind.1))?;
    info!("cronwarden control surface listening on {}", listener.local_addr()?);

    // spawn scheduler and health loops in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = SchedulerEngine::new(supervisor.clone(), &config.scheduler);
    let engine_task = tokio::spawn(engine.run(shutdown_rx.clone()));
    let health = HealthEvaluator::new(supervisor.clone(), Arc::new(ShellProbe), &config);
    let health_task = tokio::spawn(health.run(shutdown_rx));

    let state = Arc::new(app::AppState::new(
        supervisor.clone(),
        config.control.token.clone(),
    ));
    axum::serve(listener, app::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal background loops to stop, then take every job down
    let _ = shutdown_tx.send(true);
    for task in [engine_task, health_task] {
        if let Err(e) = task.await {
            error!(error = %e, "background task ended abnormally");
        }
    }
    supervisor.shutdown(Utc::now()).await;
    if !supervisor.drain(stop_grace + Duration::from_secs(1)).await {
        warn!("some jobs had not exited when cronwarden stopped");
    }
    info!("cronwarden stopped");
    Ok(())
}

fn check(config: &CronwardenConfig) -> anyhow::Result<()> {
    let catalog = Catalog::load(config.jobs.clone()).context("invalid job catalog")?;
    println!("configuration OK: {} job(s)", catalog.len());
    println!("startup order:");
    for (i, def) in catalog.startup_order().enumerate() {
        let deps = if def.depends_on.is_empty() {
            String::new()
        } else {
            format!("  after {}", def.depends_on.join(", "))
        };
        let boot = if def.start_on_boot { "  [boot]" } else { "" };
        println!("  {:>2}. {:<20} {:<16}{boot}{deps}", i + 1, def.name, def.start.as_str());
    }
    Ok(())
}

async fn list(client: &ControlClient) -> anyhow::Result<()> {
    let snapshot = client.list().await?;
    println!(
        "{:<20} {:<12} {:<8} {:<25} {:<6} WAITING ON",
        "NAME", "PHASE", "SETTLED", "STARTED", "HEALTH"
    );
    for job in &snapshot.jobs {
        print_row(job);
    }
    if let Some(global) = &snapshot.global_health {
        println!("global health: {:?} at {}", global.status, global.checked_at);
    }
    Ok(())
}

fn print_row(job: &JobStatusView) {
    let started = job
        .started_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let health = match &job.health {
        Some(h) if h.passed() => "pass",
        Some(_) => "FAIL",
        None => "-",
    };
    let phase = if job.dormant {
        format!("{}*", job.phase)
    } else {
        job.phase.to_string()
    };
    println!(
        "{:<20} {:<12} {:<8} {:<25} {:<6} {}",
        job.name,
        phase,
        job.settled,
        started,
        health,
        job.waiting_on.join(",")
    );
}

async fn command(cli: &Cli, job: &str, command: JobCommand) -> anyhow::Result<()> {
    let view = control_client(cli)?.command(job, command).await?;
    println!("{}: {} ({})", view.name, view.phase, command);
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
