//! The pipefire daemon (C8): loads host configuration, resolves each
//! configured pipeline through the plugin registry, and runs one supervisor
//! loop per pipeline — reconnect the listener on any error, with a flat 2
//! second backoff, until a shutdown signal arrives (spec.md §6, §9 Design
//! Note). There is no exponential backoff or circuit breaker here: bus and
//! database outages are expected to be short, and a human is expected to be
//! paged if they aren't.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pipefire_config::{BusConfig, LoadedConfig};
use pipefire_plugins::Pipeline;
use pipefire_tasks::Services;

#[tokio::main]
async fn main() {
    let config = match pipefire_config::load_default() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("pipefired: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.host.loglevel);

    if let Err(e) = run(config).await {
        error!(error = %e, "pipefired exiting with error");
        std::process::exit(1);
    }
}

/// Maps the configured `loglevel` (`trace|debug|information|warning`) to a
/// `tracing` directive; any unrecognized value leaves the default in place
/// rather than failing startup (spec.md §8).
fn init_logging(loglevel: &str) {
    let directive = match loglevel {
        "trace" => "trace",
        "debug" => "debug",
        "information" => "info",
        "warning" => "warn",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: LoadedConfig) -> Result<(), pipefire_domain::PipelineError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(config.pipelines.len());
    for (name, def) in config.pipelines {
        let pool = pipefire_ledger::connect(&def.database.connection_url(), def.database.max_connections)
            .await
            .map_err(|e| {
                pipefire_domain::PipelineError::TransientInfra(format!("connecting database for '{name}': {e}"))
            })?;

        let services = Services::new(pool.clone());
        let pipeline = match pipefire_plugins::resolve(&name, &def, services) {
            Ok(p) => p,
            Err(e) => {
                // Failure to construct one pipeline is non-fatal to the
                // daemon as a whole (spec.md §4.7) — other pipelines still
                // start.
                error!(pipeline = %name, error = %e, "failed to construct pipeline, skipping it");
                continue;
            }
        };

        let bus = def.rabbitmq.clone();
        let shutdown_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(supervise(name, bus, pipeline, pool, shutdown_rx)));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping pipelines");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }

    info!("pipefired stopped");
    Ok(())
}

/// One listener-reconnect loop per pipeline. A listener error (broker
/// disconnect, channel closed) is logged and retried after a fixed 2s
/// delay; a shutdown signal breaks the loop and releases the pipeline and
/// its database pool.
async fn supervise(
    name: String,
    bus: BusConfig,
    pipeline: Arc<dyn Pipeline>,
    pool: PgPool,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = pipefire_listener::listen(&bus, pipeline.clone()) => {
                if let Err(e) = result {
                    error!(pipeline = %name, error = %e, "listener stopped, reconnecting in 2s");
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                    _ = shutdown.changed() => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    let _ = pipeline.close().await;
    pool.close().await;
    info!(pipeline = %name, "pipeline supervisor stopped");
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("installing SIGHUP handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sighup.recv() => info!("received SIGHUP"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}
