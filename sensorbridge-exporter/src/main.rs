//! Prometheus exporter for sensor telemetry.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use sensorbridge_exporter::{
    ExporterConfig, FieldFilter, HttpServer, IngestPipeline, IngestStats, MetricRegistry,
    ProcessCollector, TelemetrySubscriber,
};

/// Prometheus exporter for sensor telemetry.
#[derive(Parser, Debug)]
#[command(name = "sensorbridge-exporter")]
#[command(about = "Export sensor telemetry received over Zenoh as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    sensorbridge_common::init_tracing(&config.logging)?;

    info!("Starting sensorbridge exporter");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stats = Arc::new(IngestStats::default());
    let mut registry =
        MetricRegistry::new(config.metrics.predefined_metrics()).with_collector(stats.clone());
    if config.prometheus.process_metrics {
        match ProcessCollector::new() {
            Ok(collector) => registry = registry.with_collector(Arc::new(collector)),
            Err(e) => warn!(error = %e, "Process metrics disabled"),
        }
    }
    let registry = Arc::new(registry);

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let pipeline = IngestPipeline::new(
        registry.clone(),
        FieldFilter::new(&config.filters),
        stats.clone(),
    );
    let subscriber = TelemetrySubscriber::new(pipeline, config.subscription.key_expr.clone());
    let http_server = HttpServer::new(registry.clone(), listen_addr, config.prometheus.path.clone());

    let zenoh_config = config.zenoh.clone();
    let subscriber_shutdown = shutdown_rx.clone();
    let subscriber_task = tokio::spawn(async move {
        if let Err(e) = subscriber.run(&zenoh_config, subscriber_shutdown).await {
            error!("Subscriber error: {}", e);
        }
    });

    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = subscriber_task.await;
        let _ = http_task.await;
    })
    .await;

    let final_stats = stats.snapshot();
    info!(
        messages_received = final_stats.messages_received,
        messages_dropped = final_stats.messages_dropped,
        samples_recorded = final_stats.samples_recorded,
        fields_skipped = final_stats.fields_skipped,
        metrics_registered = registry.len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}
