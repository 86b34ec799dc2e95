//! Scan record to telemetry message encoding.

use sl_protocol::{MAX_TELEMETRY_BODY, ScanRecord, TelemetryBody, TelemetryMessage};

use crate::error::EncodeError;

/// Filters and encodes scan records for one device.
#[derive(Debug, Clone)]
pub struct TelemetryEncoder {
    rssi_threshold: i16,
    topic: String,
    receptor_id: String,
}

impl TelemetryEncoder {
    pub fn new(rssi_threshold: i16, topic: impl Into<String>, receptor_id: impl Into<String>) -> Self {
        Self {
            rssi_threshold,
            topic: topic.into(),
            receptor_id: receptor_id.into(),
        }
    }

    pub fn rssi_threshold(&self) -> i16 {
        self.rssi_threshold
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn receptor_id(&self) -> &str {
        &self.receptor_id
    }

    /// Strictly above the threshold; records at the threshold are dropped.
    pub fn admits(&self, record: &ScanRecord) -> bool {
        record.rssi > self.rssi_threshold
    }

    pub fn encode_payload(&self, bytes: &[u8]) -> String {
        sl_protocol::encode_payload(bytes)
    }

    pub fn body(&self, record: &ScanRecord, hex_payload: &str) -> TelemetryBody {
        TelemetryBody::from_record(&self.receptor_id, record, hex_payload)
    }

    /// Compose the JSON message. Bodies that do not fit the telemetry buffer
    /// are rejected, never truncated.
    pub fn build_message(
        &self,
        record: &ScanRecord,
        hex_payload: &str,
    ) -> Result<TelemetryMessage, EncodeError> {
        let body = serde_json::to_string(&self.body(record, hex_payload))
            .map_err(|e| EncodeError::Serialization(e.to_string()))?;
        if body.len() >= MAX_TELEMETRY_BODY {
            return Err(EncodeError::BufferTooSmall {
                size: body.len(),
                max: MAX_TELEMETRY_BODY,
            });
        }
        Ok(TelemetryMessage::new(self.topic.clone(), body))
    }

    pub fn encode(&self, record: &ScanRecord) -> Result<TelemetryMessage, EncodeError> {
        let hex = self.encode_payload(&record.payload);
        self.build_message(record, &hex)
    }

    /// Scan log row for `record`.
    pub fn log_row(&self, record: &ScanRecord) -> String {
        let hex = self.encode_payload(&record.payload);
        self.body(record, &hex).log_row()
    }
}
