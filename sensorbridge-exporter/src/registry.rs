//! Metric registry that owns every dynamically created gauge.
//!
//! Metrics are created on first observation of a field name, either from the
//! predefined table or ad hoc (help text = name), and live for the lifetime
//! of the process. Each metric keeps only the latest value per label tuple.
//!
//! Locking: the name → metric map sits behind one `RwLock`, taken for writing
//! only when a new name is registered. Each gauge guards its samples with its
//! own `RwLock`, so a snapshot never sees a half-written sample.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::exposition::{write_header, write_sample};
use crate::mapping::MetricType;

/// The only label carried by sensor metrics.
pub const DEVICE_ID_LABEL: &str = "device_id";

/// Field names known up front, with their help text.
pub const BUILTIN_METRICS: [(&str, &str); 3] = [
    ("temperature", "Temperature"),
    ("humidity", "Humidity"),
    ("linkquality", "Link quality"),
];

/// Registry errors.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Metric name '{0}' is reserved by a built-in collector")]
    Reserved(String),
    #[error("Metric '{0}' is not registered")]
    Unknown(String),
    #[error("Metric '{name}' expects {expected} label value(s), got {actual}")]
    LabelMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Metric '{0}' only accepts finite values")]
    NonFinite(String),
}

/// Snapshot rendering errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to format snapshot: {0}")]
    Format(#[from] std::fmt::Error),
    #[error("Failed to read process metrics: {0}")]
    Process(String),
}

/// Identifies one series: a metric name and the device reporting it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub device_id: String,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
        }
    }
}

/// Shape of a metric known before it is first observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredefinedMetric {
    pub help: String,
    pub label_names: Vec<String>,
}

impl PredefinedMetric {
    /// A predefined metric labelled by device id.
    pub fn per_device(help: impl Into<String>) -> Self {
        Self {
            help: help.into(),
            label_names: vec![DEVICE_ID_LABEL.to_string()],
        }
    }
}

/// Build the default predefined table.
pub fn builtin_predefined() -> HashMap<String, PredefinedMetric> {
    BUILTIN_METRICS
        .iter()
        .map(|(name, help)| (name.to_string(), PredefinedMetric::per_device(*help)))
        .collect()
}

/// A named gauge holding the last value written per label tuple.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    help: String,
    label_names: Vec<String>,
    samples: RwLock<BTreeMap<Vec<String>, f64>>,
}

impl Gauge {
    fn new(name: String, help: String, label_names: Vec<String>) -> Self {
        Self {
            name,
            help,
            label_names,
            samples: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Overwrite the sample for `label_values`.
    pub fn set(&self, label_values: &[&str], value: f64) -> Result<(), RegistryError> {
        if label_values.len() != self.label_names.len() {
            return Err(RegistryError::LabelMismatch {
                name: self.name.clone(),
                expected: self.label_names.len(),
                actual: label_values.len(),
            });
        }
        if !value.is_finite() {
            return Err(RegistryError::NonFinite(self.name.clone()));
        }

        let key = label_values.iter().map(|v| v.to_string()).collect();
        self.samples.write().insert(key, value);
        Ok(())
    }

    /// Current value for `label_values`, if one was ever written.
    pub fn get(&self, label_values: &[&str]) -> Option<f64> {
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        self.samples.read().get(&key).copied()
    }

    /// Number of stored samples.
    pub fn sample_count(&self) -> usize {
        self.samples.read().len()
    }

    fn encode(&self, out: &mut String) -> std::fmt::Result {
        write_header(out, &self.name, &self.help, MetricType::Gauge)?;

        let samples = self.samples.read();
        for (values, value) in samples.iter() {
            let labels: Vec<(&str, &str)> = self
                .label_names
                .iter()
                .map(String::as_str)
                .zip(values.iter().map(String::as_str))
                .collect();
            write_sample(out, &self.name, &labels, *value)?;
        }
        Ok(())
    }
}

/// Additional metric families rendered after the registry's own gauges.
pub trait Collector: Send + Sync {
    /// Names this collector writes. The registry refuses to create gauges
    /// with these names.
    fn metric_names(&self) -> &'static [&'static str];

    /// Append this collector's families to `out`.
    fn encode(&self, out: &mut String) -> Result<(), SnapshotError>;
}

/// Thread-safe registry of sensor gauges.
pub struct MetricRegistry {
    metrics: RwLock<HashMap<String, Arc<Gauge>>>,
    predefined: HashMap<String, PredefinedMetric>,
    collectors: Vec<Arc<dyn Collector>>,
    reserved: HashSet<&'static str>,
}

impl MetricRegistry {
    /// Create a registry consulting `predefined` before ad hoc creation.
    pub fn new(predefined: HashMap<String, PredefinedMetric>) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            predefined,
            collectors: Vec::new(),
            reserved: HashSet::new(),
        }
    }

    /// Compose a collector into every snapshot.
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.reserved.extend(collector.metric_names().iter().copied());
        self.collectors.push(collector);
        self
    }

    /// Return the metric registered as `name`, creating it if needed.
    ///
    /// Creation happens under the write lock, so concurrent first observations
    /// of the same name all receive the same `Arc`.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Gauge>, RegistryError> {
        if let Some(metric) = self.metrics.read().get(name) {
            return Ok(metric.clone());
        }

        if self.reserved.contains(name) {
            return Err(RegistryError::Reserved(name.to_string()));
        }

        let mut metrics = self.metrics.write();
        let metric = metrics.entry(name.to_string()).or_insert_with(|| {
            let gauge = match self.predefined.get(name) {
                Some(spec) => Gauge::new(
                    name.to_string(),
                    spec.help.clone(),
                    spec.label_names.clone(),
                ),
                None => Gauge::new(
                    name.to_string(),
                    name.to_string(),
                    vec![DEVICE_ID_LABEL.to_string()],
                ),
            };
            debug!(
                metric = %name,
                predefined = self.predefined.contains_key(name),
                "Registered metric"
            );
            Arc::new(gauge)
        });

        Ok(metric.clone())
    }

    /// Look up a registered metric without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<Gauge>> {
        self.metrics.read().get(name).cloned()
    }

    /// Overwrite the sample of a registered metric.
    pub fn set_sample(
        &self,
        name: &str,
        label_values: &[&str],
        value: f64,
    ) -> Result<(), RegistryError> {
        let metric = self
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        metric.set(label_values, value)
    }

    /// Current value of one series.
    pub fn sample(&self, key: &MetricKey) -> Option<f64> {
        self.get(&key.name)?.get(&[key.device_id.as_str()])
    }

    /// Number of registered metrics.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Render every metric in Prometheus exposition format.
    ///
    /// Metrics are sorted by name and samples by label values, so two
    /// snapshots of the same state are byte-identical.
    pub fn render_snapshot(&self) -> Result<String, SnapshotError> {
        let mut metrics: Vec<Arc<Gauge>> = self.metrics.read().values().cloned().collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));

        let mut output = String::with_capacity(metrics.len() * 128);
        for metric in &metrics {
            metric.encode(&mut output)?;
        }

        for collector in &self.collectors {
            collector.encode(&mut output)?;
        }

        Ok(output)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(builtin_predefined())
    }
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;
