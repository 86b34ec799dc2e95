use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Real-time-clock rendering used in telemetry and log rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One observation of a nearby peer device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Peer address as reported by the scanner (e.g., "aa:bb:cc:dd:ee:ff").
    pub peer_address: String,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Raw advertisement payload, hex-encoded on the wire.
    #[serde(with = "hex_bytes", default)]
    pub payload: Vec<u8>,
    /// When the peer was observed.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ScanRecord {
    pub fn new(
        peer_address: impl Into<String>,
        rssi: i16,
        payload: impl Into<Vec<u8>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            peer_address: peer_address.into(),
            rssi,
            payload: payload.into(),
            timestamp,
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Render bytes as uppercase hex pairs with no separator.
pub fn encode_payload(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Inverse of [`encode_payload`]; accepts either case.
pub fn decode_payload(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::encode_payload(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::decode_payload(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex payload: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encode_is_uppercase_and_fixed_width() {
        assert_eq!(encode_payload(&[0x01, 0x02]), "0102");
        assert_eq!(encode_payload(&[0x00, 0xab, 0xff]), "00ABFF");
        assert_eq!(encode_payload(&[]), "");
    }

    #[test]
    fn decode_recovers_bytes() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_payload(&encode_payload(&bytes)).unwrap(), bytes);
        assert_eq!(decode_payload("0aFf").unwrap(), vec![0x0a, 0xff]);
    }

    #[test]
    fn decode_rejects_malformed() {
        assert!(decode_payload("ABC").is_none());
        assert!(decode_payload("ZZ").is_none());
        assert!(decode_payload("é1").is_none());
    }

    #[test]
    fn distinct_inputs_encode_distinctly() {
        // Fixed width keeps [0x01, 0x10] and [0x11, 0x00] apart.
        assert_ne!(encode_payload(&[0x01, 0x10]), encode_payload(&[0x11, 0x00]));
        assert_ne!(encode_payload(&[0x00]), encode_payload(&[0x00, 0x00]));
    }

    #[test]
    fn timestamp_uses_clock_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_timestamp(ts), "2024-03-09 07:05:01");
    }

    #[test]
    fn record_deserializes_from_scanner_line() {
        let line = r#"{"peer_address":"AA:BB:CC:DD:EE:FF","rssi":-60,"payload":"0102","timestamp":"2024-03-09T07:05:01Z"}"#;
        let record: ScanRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.peer_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(record.rssi, -60);
        assert_eq!(record.payload, vec![0x01, 0x02]);
        assert_eq!(record.formatted_timestamp(), "2024-03-09 07:05:01");
    }

    #[test]
    fn record_without_payload_or_timestamp() {
        let record: ScanRecord =
            serde_json::from_str(r#"{"peer_address":"11:22:33:44:55:66","rssi":-70}"#).unwrap();
        assert!(record.payload.is_empty());
    }

    #[test]
    fn record_with_bad_hex_fails() {
        let result = serde_json::from_str::<ScanRecord>(
            r#"{"peer_address":"x","rssi":-70,"payload":"XYZ"}"#,
        );
        assert!(result.is_err());
    }
}
