//! Mapping from decoded JSON fields to Prometheus metrics.

use serde_json::Value;
use serde_json::value::RawValue;

/// Sanitize a field name to be a Prometheus-compatible metric name.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// Names that already match are returned unchanged. Otherwise this function:
/// - Replaces invalid characters with underscores
/// - Ensures the name starts with a letter or underscore
/// - Collapses multiple underscores into one
pub fn sanitize_metric_name(name: &str) -> String {
    if is_valid_metric_name(name) {
        return name.to_string();
    }

    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;
    let mut chars = name.chars().peekable();

    // A leading digit is kept, behind an underscore
    if let Some(&first) = chars.peek()
        && first.is_ascii_digit()
    {
        result.push('_');
        last_was_underscore = true;
    }

    for c in chars {
        let is_valid_char = c.is_ascii_alphanumeric() || c == '_' || c == ':';

        if is_valid_char {
            if c == '_' {
                if !last_was_underscore {
                    result.push(c);
                    last_was_underscore = true;
                }
            } else {
                result.push(c);
                last_was_underscore = false;
            }
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') && result.len() > 1 {
        result.pop();
    }

    if result.is_empty() || result == "_" {
        return "unnamed".to_string();
    }

    result
}

/// Check whether `name` is already a valid Prometheus metric name.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Prometheus metric type, as written in the `# TYPE` comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Extract a sample value from a decoded JSON field.
///
/// Only finite JSON numbers qualify. Strings (including `"NaN"`), booleans,
/// nulls, arrays and objects yield `None`.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Decode one raw payload field and extract its sample value.
///
/// Fields that fail to decode on their own, such as numbers beyond the `f64`
/// range, yield `None` like any other non-numeric value.
pub fn numeric_field(raw: &RawValue) -> Option<f64> {
    serde_json::from_str::<Value>(raw.get())
        .ok()
        .as_ref()
        .and_then(numeric_value)
}
