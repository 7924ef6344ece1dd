//! Prometheus exporter for sensor telemetry published over Zenoh.
//!
//! Devices publish flat JSON objects (`{"temperature": 21.5, ...}`) on keys
//! shaped like `<prefix>/<device_id>/...`. Every finite numeric field becomes
//! a gauge named after the field and labelled with `device_id`; the latest
//! value per device is served on an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Zenoh Network  │────>│ IngestPipeline  │────>│ MetricRegistry  │
//! │  (sensors/**)   │     │ (decode, route) │     │ (latest values) │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────v────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! sensorbridge-exporter --config config.json5
//! ```
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod exposition;
pub mod filter;
pub mod http;
pub mod ingest;
pub mod mapping;
pub mod process;
pub mod registry;
pub mod subscriber;

pub use config::ExporterConfig;
pub use filter::FieldFilter;
pub use http::HttpServer;
pub use ingest::{IngestPipeline, IngestStats};
pub use process::ProcessCollector;
pub use registry::{MetricKey, MetricRegistry, SharedRegistry};
pub use subscriber::TelemetrySubscriber;
