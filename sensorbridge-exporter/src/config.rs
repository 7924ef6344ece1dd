//! Configuration for the Prometheus exporter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use sensorbridge_common::config::{LoggingConfig, ZenohConfig};
use sensorbridge_common::topic::DEFAULT_KEY_EXPR;

use crate::ingest::STATS_METRIC_NAMES;
use crate::mapping::is_valid_metric_name;
use crate::process::PROCESS_METRIC_NAMES;
use crate::registry::{BUILTIN_METRICS, PredefinedMetric};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Zenoh connection settings (the broker endpoints).
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Which key expression to subscribe to.
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Predefined metric help texts.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Field and device filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Key expression devices publish on (default: "sensors/**").
    /// The second chunk of each received key is the device id.
    #[serde(default = "default_key_expr")]
    pub key_expr: String,
}

fn default_key_expr() -> String {
    DEFAULT_KEY_EXPR.to_string()
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            key_expr: default_key_expr(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9090").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Include `process_*` metrics of the exporter itself (default: true).
    #[serde(default = "default_process_metrics")]
    pub process_metrics: bool,
}

fn default_listen() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_process_metrics() -> bool {
    true
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            process_metrics: default_process_metrics(),
        }
    }
}

/// Metrics known before their first observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Field name to help text. Replaces the built-in table when set.
    #[serde(default = "default_predefined")]
    pub predefined: BTreeMap<String, String>,
}

fn default_predefined() -> BTreeMap<String, String> {
    BUILTIN_METRICS
        .iter()
        .map(|(name, help)| (name.to_string(), help.to_string()))
        .collect()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            predefined: default_predefined(),
        }
    }
}

impl MetricsConfig {
    /// Build the registry's predefined table.
    pub fn predefined_metrics(&self) -> HashMap<String, PredefinedMetric> {
        self.predefined
            .iter()
            .map(|(name, help)| (name.clone(), PredefinedMetric::per_device(help.clone())))
            .collect()
    }
}

/// Field and device filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns for fields to include (empty = all).
    #[serde(default)]
    pub include_fields: Vec<String>,

    /// Glob patterns for fields to exclude.
    #[serde(default)]
    pub exclude_fields: Vec<String>,

    /// Only include these device ids (empty = all).
    #[serde(default)]
    pub include_devices: Vec<String>,

    /// Exclude these device ids.
    #[serde(default)]
    pub exclude_devices: Vec<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.zenoh
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.subscription.key_expr.trim().is_empty() {
            return Err(ConfigError::Validation(
                "subscription key_expr must not be empty".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        // ':' and '*' are route captures in axum
        if self.prometheus.path.contains([':', '*']) {
            return Err(ConfigError::Validation(format!(
                "Metrics path must not contain ':' or '*': {}",
                self.prometheus.path
            )));
        }

        if let Some(name) = self
            .metrics
            .predefined
            .keys()
            .find(|name| !is_valid_metric_name(name))
        {
            return Err(ConfigError::Validation(format!(
                "Invalid predefined metric name: {}",
                name
            )));
        }

        if let Some(name) = self.metrics.predefined.keys().find(|name| {
            STATS_METRIC_NAMES.contains(&name.as_str())
                || PROCESS_METRIC_NAMES.contains(&name.as_str())
        }) {
            return Err(ConfigError::Validation(format!(
                "Predefined metric name is reserved by a built-in collector: {}",
                name
            )));
        }

        Ok(())
    }
}
