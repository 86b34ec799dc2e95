//! MQTT topic builders and parsers for the device topic hierarchy.
//!
//! Topic structure:
//! ```text
//! devices/{device_id}/messages/events/                  (device → cloud)
//! devices/{device_id}/messages/devicebound/#            (cloud → device filter)
//! devices/{device_id}/messages/devicebound/{properties} (cloud → device message)
//! ```

const PREFIX: &str = "devices";

// ─── Publish topics ───

pub fn telemetry(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/messages/events/")
}

// ─── Subscription patterns (with MQTT wildcards) ───

/// Cloud-to-device inbox for a single device.
pub fn devicebound_subscribe(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/messages/devicebound/#")
}

// ─── Topic parsing ───

/// Parsed cloud-to-device topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceboundTopic {
    pub device_id: String,
    /// Key/value pairs from the property bag following `devicebound/`.
    pub properties: Vec<(String, String)>,
}

/// Parse a cloud-to-device topic.
/// Returns `None` if the topic doesn't match the expected format.
pub fn parse_devicebound(topic: &str) -> Option<DeviceboundTopic> {
    let rest = topic.strip_prefix("devices/")?;
    let (device_id, rest) = rest.split_once('/')?;
    let bag = rest.strip_prefix("messages/devicebound/")?;

    if device_id.is_empty() {
        return None;
    }

    let properties = bag
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect();

    Some(DeviceboundTopic {
        device_id: device_id.to_string(),
        properties,
    })
}
