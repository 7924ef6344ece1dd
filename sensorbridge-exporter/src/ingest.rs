//! Turns `(topic, payload)` messages into registry samples.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sensorbridge_common::topic::device_id;
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::exposition::write_single;
use crate::filter::FieldFilter;
use crate::mapping::{MetricType, numeric_field, sanitize_metric_name};
use crate::registry::{
    Collector, DEVICE_ID_LABEL, MetricKey, RegistryError, SharedRegistry, SnapshotError,
};

const MESSAGES_RECEIVED: &str = "sensorbridge_messages_received_total";
const MESSAGES_DROPPED: &str = "sensorbridge_messages_dropped_total";
const SAMPLES_RECORDED: &str = "sensorbridge_samples_recorded_total";
const FIELDS_SKIPPED: &str = "sensorbridge_fields_skipped_total";

/// Families written by [`IngestStats`].
pub const STATS_METRIC_NAMES: &[&str] = &[
    MESSAGES_RECEIVED,
    MESSAGES_DROPPED,
    SAMPLES_RECORDED,
    FIELDS_SKIPPED,
];

/// Reasons a whole message is dropped.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to decode payload as a JSON object: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("No device id in topic '{0}'")]
    MissingDeviceId(String),
    #[error("Device '{0}' is excluded by filters")]
    DeviceFiltered(String),
}

/// What one accepted message did to the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Series written, ordered by field name.
    pub recorded: Vec<MetricKey>,
    /// Fields that were not numeric, filtered, or rejected by the registry.
    pub skipped: usize,
}

/// Ingest counters, rendered into every snapshot.
#[derive(Debug, Default)]
pub struct IngestStats {
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    samples_recorded: AtomicU64,
    fields_skipped: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub samples_recorded: u64,
    pub fields_skipped: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            fields_skipped: self.fields_skipped.load(Ordering::Relaxed),
        }
    }
}

impl Collector for IngestStats {
    fn metric_names(&self) -> &'static [&'static str] {
        STATS_METRIC_NAMES
    }

    fn encode(&self, out: &mut String) -> Result<(), SnapshotError> {
        let stats = self.snapshot();
        write_single(
            out,
            MESSAGES_RECEIVED,
            "Messages delivered by the subscription.",
            MetricType::Counter,
            stats.messages_received as f64,
        )?;
        write_single(
            out,
            MESSAGES_DROPPED,
            "Messages dropped for an undecodable payload, missing device id or device filter.",
            MetricType::Counter,
            stats.messages_dropped as f64,
        )?;
        write_single(
            out,
            SAMPLES_RECORDED,
            "Samples written to the registry.",
            MetricType::Counter,
            stats.samples_recorded as f64,
        )?;
        write_single(
            out,
            FIELDS_SKIPPED,
            "Payload fields skipped as non-numeric, filtered or reserved.",
            MetricType::Counter,
            stats.fields_skipped as f64,
        )?;
        Ok(())
    }
}

/// Decodes sensor messages and drives the registry.
///
/// Messages are applied in the order `handle` is called; callers that want
/// per-device ordering must not call it concurrently for the same topic.
pub struct IngestPipeline {
    registry: SharedRegistry,
    filter: FieldFilter,
    stats: Arc<IngestStats>,
}

impl IngestPipeline {
    pub fn new(registry: SharedRegistry, filter: FieldFilter, stats: Arc<IngestStats>) -> Self {
        Self {
            registry,
            filter,
            stats,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle one message.
    ///
    /// Failures are logged here and returned for the caller's information
    /// only; none of them should stop the subscription.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> Result<IngestReport, IngestError> {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        let result = self.ingest(topic, payload);

        match &result {
            Ok(report) => {
                self.stats
                    .samples_recorded
                    .fetch_add(report.recorded.len() as u64, Ordering::Relaxed);
                self.stats
                    .fields_skipped
                    .fetch_add(report.skipped as u64, Ordering::Relaxed);
                trace!(
                    topic,
                    recorded = report.recorded.len(),
                    skipped = report.skipped,
                    "Message ingested"
                );
            }
            Err(e) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                match e {
                    IngestError::DeviceFiltered(_) => debug!(topic, "{}", e),
                    _ => warn!(
                        topic,
                        payload = %String::from_utf8_lossy(payload),
                        error = %e,
                        "Dropping message"
                    ),
                }
            }
        }

        result
    }

    fn ingest(&self, topic: &str, payload: &[u8]) -> Result<IngestReport, IngestError> {
        // Values are decoded per field; an out-of-range number skips only that field
        let fields: BTreeMap<String, Box<RawValue>> = serde_json::from_slice(payload)?;

        let device = device_id(topic).ok_or_else(|| IngestError::MissingDeviceId(topic.to_string()))?;
        if !self.filter.allows_device(device) {
            return Err(IngestError::DeviceFiltered(device.to_string()));
        }

        let mut report = IngestReport::default();

        for (field, value) in &fields {
            let Some(value) = numeric_field(value) else {
                trace!(field = %field, "Skipping non-numeric field");
                report.skipped += 1;
                continue;
            };

            if !self.filter.allows_field(field) {
                trace!(field = %field, "Field filtered out");
                report.skipped += 1;
                continue;
            }

            let name = sanitize_metric_name(field);
            match self.record(&name, device, value) {
                Ok(()) => report.recorded.push(MetricKey::new(name, device)),
                Err(e) => {
                    debug!(field = %field, error = %e, "Field not recorded");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    fn record(&self, name: &str, device: &str, value: f64) -> Result<(), RegistryError> {
        let metric = self.registry.get_or_create(name)?;
        if metric.label_names() != [DEVICE_ID_LABEL] {
            return Err(RegistryError::LabelMismatch {
                name: name.to_string(),
                expected: metric.label_names().len(),
                actual: 1,
            });
        }
        metric.set(&[device], value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::registry::MetricRegistry;

    fn make_pipeline() -> IngestPipeline {
        let stats = Arc::new(IngestStats::default());
        let registry = Arc::new(MetricRegistry::default().with_collector(stats.clone()));
        IngestPipeline::new(registry, FieldFilter::default(), stats)
    }

    #[test]
    fn test_mixed_payload_records_only_numbers() {
        let pipeline = make_pipeline();

        let report = pipeline
            .handle(
                "sensors/abc123/data",
                br#"{"temperature": 21.5, "label": "ok", "humidity": "NaN"}"#,
            )
            .unwrap();

        assert_eq!(report.recorded, vec![MetricKey::new("temperature", "abc123")]);
        assert_eq!(report.skipped, 2);

        let registry = pipeline.registry();
        assert_eq!(
            registry.sample(&MetricKey::new("temperature", "abc123")),
            Some(21.5)
        );
        assert!(registry.get("label").is_none());
        assert!(registry.get("humidity").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_malformed_json_dropped() {
        let pipeline = make_pipeline();

        let result = pipeline.handle("sensors/abc123/data", b"{not json");

        assert!(matches!(result, Err(IngestError::Decode(_))));
        assert!(pipeline.registry().is_empty());
        assert_eq!(pipeline.stats().messages_dropped, 1);
    }

    #[test]
    fn test_non_object_payload_dropped() {
        let pipeline = make_pipeline();

        assert!(pipeline.handle("sensors/abc123/data", b"42").is_err());
        assert!(pipeline.handle("sensors/abc123/data", b"[1, 2]").is_err());
        assert!(pipeline.registry().is_empty());
    }

    #[test]
    fn test_missing_device_id_dropped() {
        let pipeline = make_pipeline();

        for topic in ["sensors//temperature", "sensors"] {
            let result = pipeline.handle(topic, br#"{"temperature": 20}"#);
            assert!(matches!(result, Err(IngestError::MissingDeviceId(_))));
        }

        assert!(pipeline.registry().is_empty());
        assert_eq!(pipeline.stats().messages_dropped, 2);
    }

    #[test]
    fn test_booleans_and_nulls_skipped() {
        let pipeline = make_pipeline();

        let report = pipeline
            .handle(
                "sensors/dev1/state",
                br#"{"occupancy": true, "battery": null, "voltage": 3000}"#,
            )
            .unwrap();

        assert_eq!(report.recorded, vec![MetricKey::new("voltage", "dev1")]);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_last_write_wins_per_device() {
        let pipeline = make_pipeline();

        pipeline.handle("sensors/a/data", br#"{"humidity": 40}"#).unwrap();
        pipeline.handle("sensors/b/data", br#"{"humidity": 55}"#).unwrap();
        pipeline.handle("sensors/a/data", br#"{"humidity": 41.5}"#).unwrap();

        let registry = pipeline.registry();
        assert_eq!(registry.sample(&MetricKey::new("humidity", "a")), Some(41.5));
        assert_eq!(registry.sample(&MetricKey::new("humidity", "b")), Some(55.0));
        assert_eq!(registry.get("humidity").unwrap().help(), "Humidity");
    }

    #[test]
    fn test_field_names_sanitized() {
        let pipeline = make_pipeline();

        let report = pipeline
            .handle("sensors/dev1/data", br#"{"battery-level": 88}"#)
            .unwrap();

        assert_eq!(report.recorded, vec![MetricKey::new("battery_level", "dev1")]);
    }

    #[test]
    fn test_out_of_range_number_skips_only_that_field() {
        let pipeline = make_pipeline();

        let report = pipeline
            .handle(
                "sensors/abc123/data",
                br#"{"temperature": 21.5, "big": 1e400}"#,
            )
            .unwrap();

        assert_eq!(report.recorded, vec![MetricKey::new("temperature", "abc123")]);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            pipeline
                .registry()
                .sample(&MetricKey::new("temperature", "abc123")),
            Some(21.5)
        );
        assert!(pipeline.registry().get("big").is_none());
        assert_eq!(pipeline.stats().messages_dropped, 0);
    }

    #[test]
    fn test_valid_field_names_kept_verbatim() {
        let pipeline = make_pipeline();

        let report = pipeline
            .handle(
                "sensors/dev/data",
                br#"{"temp_": 1, "temp": 2, "soil__moisture": 3, "_": 4}"#,
            )
            .unwrap();

        // Ordered by field name, not payload position
        assert_eq!(
            report.recorded,
            vec![
                MetricKey::new("_", "dev"),
                MetricKey::new("soil__moisture", "dev"),
                MetricKey::new("temp", "dev"),
                MetricKey::new("temp_", "dev"),
            ]
        );
        assert_eq!(report.skipped, 0);

        let registry = pipeline.registry();
        assert_eq!(registry.sample(&MetricKey::new("temp_", "dev")), Some(1.0));
        assert_eq!(registry.sample(&MetricKey::new("temp", "dev")), Some(2.0));
        assert_eq!(
            registry.sample(&MetricKey::new("soil__moisture", "dev")),
            Some(3.0)
        );
        assert_eq!(registry.sample(&MetricKey::new("_", "dev")), Some(4.0));
        assert!(registry.get("soil_moisture").is_none());
        assert!(registry.get("unnamed").is_none());
    }

    #[test]
    fn test_reserved_field_names_skipped() {
        let pipeline = make_pipeline();

        let report = pipeline
            .handle(
                "sensors/dev1/data",
                br#"{"sensorbridge_messages_received_total": 1, "temperature": 2}"#,
            )
            .unwrap();

        assert_eq!(report.recorded, vec![MetricKey::new("temperature", "dev1")]);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_filters_applied() {
        let stats = Arc::new(IngestStats::default());
        let registry = Arc::new(MetricRegistry::default());
        let filter = FieldFilter::new(&FilterConfig {
            exclude_fields: vec!["link*".to_string()],
            exclude_devices: vec!["noisy".to_string()],
            ..Default::default()
        });
        let pipeline = IngestPipeline::new(registry, filter, stats);

        let result = pipeline.handle("sensors/noisy/data", br#"{"temperature": 1}"#);
        assert!(matches!(result, Err(IngestError::DeviceFiltered(_))));

        let report = pipeline
            .handle("sensors/quiet/data", br#"{"temperature": 1, "linkquality": 90}"#)
            .unwrap();
        assert_eq!(report.recorded, vec![MetricKey::new("temperature", "quiet")]);
        assert!(pipeline.registry().get("linkquality").is_none());
    }

    #[test]
    fn test_stats_rendered_in_snapshot() {
        let pipeline = make_pipeline();

        pipeline
            .handle("sensors/abc123/data", br#"{"temperature": 21.5, "label": "ok"}"#)
            .unwrap();
        let _ = pipeline.handle("sensors", b"{}");

        assert_eq!(
            pipeline.stats(),
            IngestStatsSnapshot {
                messages_received: 2,
                messages_dropped: 1,
                samples_recorded: 1,
                fields_skipped: 1,
            }
        );

        let output = pipeline.registry().render_snapshot().unwrap();
        assert!(output.contains("temperature{device_id=\"abc123\"} 21.5\n"));
        assert!(output.contains("# TYPE sensorbridge_messages_received_total counter\n"));
        assert!(output.contains("sensorbridge_messages_received_total 2\n"));
        assert!(output.contains("sensorbridge_messages_dropped_total 1\n"));
    }
}
