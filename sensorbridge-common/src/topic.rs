//! Topic (key expression) helpers.
//!
//! Devices publish on `<prefix>/<device_id>/<anything...>`; the device id is
//! always the second `/`-delimited chunk.

/// Key expression subscribed to when none is configured.
pub const DEFAULT_KEY_EXPR: &str = "sensors/**";

/// Extract the device id from a topic.
///
/// Returns `None` when the topic has no second segment or when that segment
/// is empty.
///
/// # Example
/// ```
/// use sensorbridge_common::topic::device_id;
///
/// assert_eq!(device_id("sensors/abc123/data"), Some("abc123"));
/// assert_eq!(device_id("sensors//data"), None);
/// assert_eq!(device_id("sensors"), None);
/// ```
pub fn device_id(topic: &str) -> Option<&str> {
    topic.split('/').nth(1).filter(|id| !id.is_empty())
}
