//! Cloud-to-device message delivery.

use std::sync::Mutex;

use async_trait::async_trait;

/// Receives cloud-to-device payloads forwarded from the broker session.
#[async_trait]
pub trait InboxHandler: Send + Sync {
    async fn deliver(&self, topic: &str, payload: &[u8], truncated: bool);
}

/// Logs each inbound message with its decoded property bag.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInbox;

#[async_trait]
impl InboxHandler for LoggingInbox {
    async fn deliver(&self, topic: &str, payload: &[u8], truncated: bool) {
        let properties = sl_protocol::topics::parse_devicebound(topic)
            .map(|t| t.properties)
            .unwrap_or_default();
        tracing::info!(
            topic = %topic,
            properties = ?properties,
            payload = %String::from_utf8_lossy(payload),
            truncated,
            "cloud-to-device message received"
        );
    }
}

/// A message captured by [`RecordingInbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub truncated: bool,
}

/// Keeps every delivery in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingInbox {
    messages: Mutex<Vec<DeliveredMessage>>,
}

impl RecordingInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<DeliveredMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl InboxHandler for RecordingInbox {
    async fn deliver(&self, topic: &str, payload: &[u8], truncated: bool) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DeliveredMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                truncated,
            });
    }
}
