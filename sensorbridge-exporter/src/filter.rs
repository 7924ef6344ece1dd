//! Field and device filtering.

use tracing::warn;

use crate::config::FilterConfig;

/// Decides which devices and fields reach the registry.
pub struct FieldFilter {
    include_fields: Vec<glob::Pattern>,
    exclude_fields: Vec<glob::Pattern>,
    include_devices: Vec<String>,
    exclude_devices: Vec<String>,
}

fn compile(patterns: &[String]) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid field pattern");
                None
            }
        })
        .collect()
}

impl FieldFilter {
    /// Create a new filter from configuration.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            include_fields: compile(&config.include_fields),
            exclude_fields: compile(&config.exclude_fields),
            include_devices: config.include_devices.clone(),
            exclude_devices: config.exclude_devices.clone(),
        }
    }

    /// Check if messages from `device_id` should be ingested.
    pub fn allows_device(&self, device_id: &str) -> bool {
        if !self.include_devices.is_empty() && !self.include_devices.iter().any(|d| d == device_id)
        {
            return false;
        }
        !self.exclude_devices.iter().any(|d| d == device_id)
    }

    /// Check if a payload field should be ingested. Matches the raw field
    /// name, before sanitisation.
    pub fn allows_field(&self, field: &str) -> bool {
        if !self.include_fields.is_empty() && !self.include_fields.iter().any(|p| p.matches(field))
        {
            return false;
        }
        !self.exclude_fields.iter().any(|p| p.matches(field))
    }
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}
