use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::scan::ScanRecord;

/// Size of the telemetry buffer, in bytes. A body must be strictly shorter
/// so it still fits with a trailing NUL on the device side.
pub const MAX_TELEMETRY_BODY: usize = 512;

/// Header line of the on-device scan log.
pub const LOG_HEADER: &str = "receptor_id,timestamp,mac_address,RSSI,payload";

/// JSON body of a scan telemetry message.
///
/// Field order is part of the wire contract and follows declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBody {
    /// Identity of the receiving device (its own MAC address).
    pub mac_chars: String,
    pub timestamp: String,
    /// Address of the observed peer.
    pub device_address: String,
    pub rssi: i16,
    /// Advertisement payload as uppercase hex.
    pub payload_string: String,
}

impl TelemetryBody {
    pub fn from_record(receptor_id: &str, record: &ScanRecord, hex_payload: &str) -> Self {
        Self {
            mac_chars: receptor_id.to_string(),
            timestamp: record.formatted_timestamp(),
            device_address: record.peer_address.clone(),
            rssi: record.rssi,
            payload_string: hex_payload.to_string(),
        }
    }

    /// Row for the append-only scan log, newline-terminated.
    ///
    /// Text fields holding a comma, quote or line break are quoted so a
    /// hostile peer address cannot add columns or rows.
    pub fn log_row(&self) -> String {
        format!(
            "{},{},{},{},{}\n",
            csv_field(&self.mac_chars),
            csv_field(&self.timestamp),
            csv_field(&self.device_address),
            self.rssi,
            csv_field(&self.payload_string)
        )
    }
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// A fully built message ready to publish. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    topic: String,
    body: String,
}

impl TelemetryMessage {
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}
