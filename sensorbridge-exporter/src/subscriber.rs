//! Zenoh subscriber feeding sensor messages into the ingest pipeline.

use tokio::sync::watch;
use tracing::{info, trace, warn};
use zenoh::Session;
use zenoh::sample::SampleKind;

use sensorbridge_common::config::ZenohConfig;

use crate::ingest::IngestPipeline;

/// Subscribes to one key expression and hands every sample to the pipeline.
///
/// Samples are processed one at a time in delivery order, which keeps
/// updates from a given device in the order they were published.
pub struct TelemetrySubscriber {
    pipeline: IngestPipeline,
    key_expr: String,
}

impl TelemetrySubscriber {
    /// Create a new subscriber.
    pub fn new(pipeline: IngestPipeline, key_expr: impl Into<String>) -> Self {
        Self {
            pipeline,
            key_expr: key_expr.into(),
        }
    }

    /// Open a session and run until the shutdown signal is received.
    pub async fn run(
        self,
        zenoh_config: &ZenohConfig,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let session = sensorbridge_common::connect(zenoh_config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open Zenoh session: {}", e))?;

        let result = self.run_with_session(&session, shutdown).await;

        session
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close session: {}", e))?;

        result
    }

    /// Run on an existing session until the shutdown signal is received.
    pub async fn run_with_session(
        self,
        session: &Session,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(key_expr = %self.key_expr, "Subscribing to sensor telemetry");
        let subscriber = session
            .declare_subscriber(&self.key_expr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create subscriber: {}", e))?;

        info!("Subscriber started, waiting for telemetry...");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping subscriber");
                        break;
                    }
                }

                sample = subscriber.recv_async() => {
                    match sample {
                        Ok(sample) => {
                            if sample.kind() == SampleKind::Delete {
                                trace!(key = %sample.key_expr(), "Ignoring delete sample");
                                continue;
                            }

                            let payload = sample.payload().to_bytes();
                            // Failures are logged by the pipeline
                            let _ = self.pipeline.handle(sample.key_expr().as_str(), &payload);
                        }
                        Err(e) => {
                            warn!("Error receiving sample: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        subscriber
            .undeclare()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to undeclare subscriber: {}", e))?;

        let stats = self.pipeline.stats();
        info!(
            messages_received = stats.messages_received,
            messages_dropped = stats.messages_dropped,
            samples_recorded = stats.samples_recorded,
            fields_skipped = stats.fields_skipped,
            "Subscriber stopped"
        );
        Ok(())
    }
}
