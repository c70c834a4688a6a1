//! runstatd — the runstat daemon.
//!
//! Samples its own process on a fixed interval and serves the registry
//! on a Prometheus scrape endpoint.
//!
//! # Usage
//!
//! ```text
//! runstatd --config /etc/runstat.toml --listen 0.0.0.0:9394
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use runstat_core::RunstatConfig;
use runstat_core::config::parse_duration;
use runstat_metrics::MetricRegistry;
use runstat_recorder::CallHistograms;
use runstat_sampler::{CountingAllocator, ObjectTracker, ProcessProbe, Sampler, SamplerSupervisor};
use runstatd::{ExporterState, build_router};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

#[derive(Parser, Debug)]
#[command(name = "runstatd", about = "runstat metrics daemon")]
struct Cli {
    /// Path to a runstat.toml file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address of the scrape endpoint.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Sampler interval, e.g. `15s` or `500ms`.
    #[arg(long, value_parser = parse_interval)]
    interval: Option<Duration>,

    /// Method call reporting threshold in milliseconds.
    #[arg(long)]
    threshold_ms: Option<u64>,

    /// Do not sample live object counts.
    #[arg(long)]
    no_object_sampling: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,runstat=debug,runstatd=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = load_config(&cli)?;
    run(config).await
}

/// Config file (or defaults) with command line overrides applied.
fn load_config(cli: &Cli) -> anyhow::Result<RunstatConfig> {
    let mut config = match &cli.config {
        Some(path) => RunstatConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunstatConfig::default(),
    };

    if let Some(listen) = cli.listen {
        config.exporter.listen = listen;
    }
    if let Some(interval) = cli.interval {
        config.sampler.interval = interval;
    }
    if let Some(ms) = cli.threshold_ms {
        config.recorder.threshold = Duration::from_millis(ms);
    }
    if cli.no_object_sampling {
        config.sampler.enable_object_sampling = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(config: RunstatConfig) -> anyhow::Result<()> {
    info!("runstat daemon starting");

    // ── Registry and instruments ───────────────────────────────

    let registry = Arc::new(MetricRegistry::new());
    let histograms = CallHistograms::register(&registry)?;
    let objects = ObjectTracker::new();

    // ── Sampler ────────────────────────────────────────────────

    let probe = ProcessProbe::new().with_object_tracker(objects.clone());
    let sampler = Sampler::new("process", Arc::new(probe), registry.clone(), config.sampler.clone())?;
    let supervisor = SamplerSupervisor::new();
    supervisor.register(sampler).await?;
    supervisor.start_all().await?;
    info!(
        interval_secs = config.sampler.interval.as_secs_f64(),
        object_sampling = config.sampler.enable_object_sampling,
        "process sampler started"
    );

    // ── Scrape endpoint ────────────────────────────────────────

    let state = ExporterState::new(histograms, config.recorder.threshold).with_object_tracker(objects);
    let router = build_router(state);

    let addr = config.exporter.listen;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "scrape endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.stop(config.sampler.stop_timeout).await;

    info!("runstat daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    }
}
