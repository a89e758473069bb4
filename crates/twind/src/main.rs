//! Twin Daemon - runs the predictive-maintenance pipeline
//!
//! Loads configuration and the machine description, makes sure trained models
//! exist, then ticks the pipeline at the configured rate until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use twin_core::pipeline::BootstrapOutcome;
use twin_core::{
    ControlCommand, FaultKind, MachineDescription, PipelineContext, PipelineService, TickSnapshot,
    TwinConfig, TwinError,
};

#[derive(Parser)]
#[command(name = "twind")]
#[command(about = "Digital twin predictive-maintenance daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the standard locations)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Machine description file
    #[arg(long, default_value = "config/armpi_fpv.toml")]
    description: PathBuf,

    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Retrain models even if artifacts exist
    #[arg(long)]
    retrain: bool,

    /// Inject a fault before starting, as kind:severity (repeatable)
    #[arg(long = "fault", value_parser = parse_fault)]
    faults: Vec<(FaultKind, f64)>,

    /// Seconds between status lines
    #[arg(long, default_value_t = 5)]
    status_secs: u64,

    /// Log filter (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_fault(value: &str) -> std::result::Result<(FaultKind, f64), String> {
    let (kind, severity) = value
        .split_once(':')
        .ok_or_else(|| format!("expected kind:severity, got '{}'", value))?;
    let kind = kind.parse::<FaultKind>().map_err(|e| e.to_string())?;
    let severity = severity
        .parse::<f64>()
        .map_err(|e| format!("bad severity '{}': {}", severity, e))?;
    Ok((kind, severity))
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_status(snapshot: &TickSnapshot) {
    let verdict = &snapshot.verdict;
    info!(
        "tick {} t={:.1}s status={} anomaly={:.3} failure={:.3} rul={:.1}h degradation={:.4}",
        snapshot.tick,
        snapshot.sim_time,
        verdict.status,
        verdict.prediction.anomaly_score,
        verdict.prediction.failure_probability,
        verdict.prediction.rul_hours,
        snapshot.degradation_factor
    );
    if !verdict.degraded_models.is_empty() {
        warn!("Degraded models: {}", verdict.degraded_models.join(", "));
    }
}

/// Exit status for a startup failure; twin errors carry their own
fn exit_status(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<TwinError>().map_or(1, TwinError::code)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if let Err(e) = run(cli).await {
        let status = exit_status(&e);
        error!("{:#} (exit {})", e, status);
        std::process::exit(status);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Twin Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => TwinConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TwinConfig::load(),
    };
    let description = MachineDescription::load(&cli.description)
        .with_context(|| format!("failed to load description {}", cli.description.display()))?;
    let summary = description.summary();
    info!(
        "Machine '{}': {} joints, {} links",
        summary.name,
        summary.num_joints,
        summary.links.len()
    );

    let mut context = PipelineContext::new(config, description);
    if cli.retrain {
        context.retrain().context("model training failed")?;
    } else {
        match context.load_or_bootstrap().context("model bootstrap failed")? {
            BootstrapOutcome::Loaded => info!("Using persisted models"),
            BootstrapOutcome::Trained(report) => info!(
                "Trained models on {} samples (failure accuracy {:?}, RUL MAE {:?})",
                report.samples,
                report.failure.metric("accuracy"),
                report.rul.metric("mae")
            ),
        }
    }

    let mut service = PipelineService::new(context);
    for (kind, severity) in cli.faults {
        service.send(ControlCommand::InjectFault { kind, severity });
    }
    service.start();
    info!("Twin Daemon ready");

    let mut updates = service.subscribe();
    let mut status = tokio::time::interval(Duration::from_secs(cli.status_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Shutting down gracefully");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Snapshot channel closed");
                    break;
                }
                let latest: Option<Arc<TickSnapshot>> = updates.borrow_and_update().clone();
                if let (Some(limit), Some(snapshot)) = (cli.ticks, latest) {
                    if snapshot.tick >= limit {
                        info!("Reached {} ticks", limit);
                        break;
                    }
                }
            }
            _ = status.tick() => {
                if let Some(snapshot) = service.latest() {
                    log_status(&snapshot);
                }
            }
        }
    }

    service.stop().await;
    if let Some(snapshot) = service.latest() {
        log_status(&snapshot);
    }
    Ok(())
}
