//! provote daemon: runs the vote admission service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;

use provote_admission::spans::gc_span;
use provote_admission::{
    AdmissionEngine, AdmissionStore, RandomJitter, ServiceConfig, ShutdownController,
};
use provote_rpc::RpcServer;
use provote_store_lmdb::LmdbEnvironment;
use provote_types::SystemClock;
use provote_utils::{format_duration, init_logging, LogFormat};

#[derive(Parser)]
#[command(name = "provote-daemon", about = "Vote admission service")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "PROVOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the LMDB environment.
    #[arg(long, env = "PROVOTE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP listen address, e.g. "0.0.0.0:8080".
    #[arg(long, env = "PROVOTE_LISTEN")]
    listen: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "PROVOTE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Log filter, e.g. "info" or "debug,provote_fraud=trace".
    #[arg(long, env = "PROVOTE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Serve Prometheus metrics at /metrics.
    #[arg(long, env = "PROVOTE_ENABLE_METRICS")]
    metrics: Option<bool>,

    /// Seconds between garbage-collection runs.
    #[arg(long, env = "PROVOTE_GC_INTERVAL_SECS")]
    gc_interval_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve,
    /// Purge expired keys and old vote attempts once and exit.
    Gc,
    /// Print the effective configuration as TOML.
    PrintConfig,
}

impl Cli {
    /// File settings (or defaults) with flags and env vars layered on top.
    fn resolve_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let path = path.to_string_lossy();
                ServiceConfig::from_toml_file(&path)
                    .with_context(|| format!("loading config from {path}"))?
            }
            None => ServiceConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(addr) = &self.listen {
            config.listen_addr = addr.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(metrics) = self.metrics {
            config.enable_metrics = metrics;
        }
        if let Some(secs) = self.gc_interval_secs {
            config.gc_interval_secs = secs;
        }
        Ok(config)
    }
}

fn open_engine(config: &ServiceConfig) -> anyhow::Result<Arc<AdmissionEngine<LmdbEnvironment>>> {
    let env = LmdbEnvironment::open(&config.data_dir, config.map_size)
        .with_context(|| format!("opening LMDB at {}", config.data_dir.display()))?;
    Ok(Arc::new(AdmissionEngine::new(
        Arc::new(env),
        &config.params,
        Arc::new(SystemClock),
        Arc::new(RandomJitter),
    )))
}

/// Collect garbage every `interval` until shutdown.
async fn run_gc<S: AdmissionStore>(
    engine: Arc<AdmissionEngine<S>>,
    interval: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let engine = engine.clone();
                let pass = tokio::task::spawn_blocking(move || {
                    gc_span().in_scope(|| engine.collect_garbage())
                });
                match pass.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "garbage collection failed"),
                    Err(e) => tracing::warn!(error = %e, "garbage collection task panicked"),
                }
            }
            _ = stop.recv() => break,
        }
    }
    tracing::debug!("GC stopped");
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let engine = open_engine(&config)?;
    let shutdown = Arc::new(ShutdownController::new());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.wait_for_signal().await });
    }

    let gc_interval = Duration::from_secs(config.gc_interval_secs.max(1));
    tracing::info!(
        data_dir = %config.data_dir.display(),
        gc_every = %format_duration(gc_interval.as_secs()),
        metrics = config.enable_metrics,
        "starting provote"
    );
    let gc = tokio::spawn(run_gc(
        engine.clone(),
        gc_interval,
        shutdown.subscribe(),
    ));

    let server = RpcServer::new(config.listen_addr.clone(), engine, config.enable_metrics);
    let served = server.serve(shutdown.signalled()).await;

    shutdown.shutdown();
    let _ = gc.await;
    served.context("HTTP server failed")?;
    tracing::info!("provote stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    match cli.command {
        Command::PrintConfig => {
            print!("{}", config.to_toml_string());
            Ok(())
        }
        Command::Gc => {
            init_logging(config.log_format, &config.log_level);
            let engine = open_engine(&config)?;
            let report = gc_span()
                .in_scope(|| engine.collect_garbage())
                .context("collecting garbage")?;
            println!(
                "purged {} expired idempotency keys and {} old vote attempts",
                report.keys, report.attempts
            );
            Ok(())
        }
        Command::Serve => {
            init_logging(config.log_format, &config.log_level);
            serve(config).await
        }
    }
}
