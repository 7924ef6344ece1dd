//! Prometheus text exposition format (version 0.0.4) writers.

use std::fmt::{self, Write};

use crate::mapping::MetricType;

/// Content type served with every snapshot.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Write the `# HELP` and `# TYPE` lines that open a metric family.
pub fn write_header(
    out: &mut String,
    name: &str,
    help: &str,
    metric_type: MetricType,
) -> fmt::Result {
    writeln!(out, "# HELP {} {}", name, escape_help(help))?;
    writeln!(out, "# TYPE {} {}", name, metric_type.as_str())
}

/// Write one sample line: `name{k="v",...} value`.
pub fn write_sample(
    out: &mut String,
    name: &str,
    labels: &[(&str, &str)],
    value: f64,
) -> fmt::Result {
    writeln!(out, "{}{} {}", name, format_labels(labels), format_value(value))
}

/// Write a complete single-sample family without labels.
pub fn write_single(
    out: &mut String,
    name: &str,
    help: &str,
    metric_type: MetricType,
    value: f64,
) -> fmt::Result {
    write_header(out, name, help, metric_type)?;
    write_sample(out, name, &[], value)
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape help text. Quotes are legal in HELP lines.
fn escape_help(help: &str) -> String {
    let mut result = String::with_capacity(help.len());
    for c in help.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
