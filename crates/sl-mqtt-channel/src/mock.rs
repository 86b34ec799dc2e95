//! Mock broker for testing without a real MQTT server.
//!
//! `MockChannel` records all publishes, subscriptions and disconnects;
//! `MockConnector` hands out mock channels and lets tests inject events.

use async_trait::async_trait;
use rumqttc::QoS;
use sl_protocol::{Credential, Identity};
use std::sync::Arc;
use std::sync::Mutex;

use crate::channel::{Channel, Connector};
use crate::error::{MqttError, MqttResult};
use crate::handler::{EventSink, InboundEvent, SessionEvent};

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock implementation of the `Channel` trait.
///
/// Stores all publishes and subscriptions in memory for test verification.
/// Thread-safe via `Mutex` (fine for test contexts).
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    disconnects: Mutex<usize>,
    fail_publish: Mutex<bool>,
    fail_disconnect: Mutex<bool>,
    ack_sink: Mutex<Option<(u64, EventSink)>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            disconnects: Mutex::new(0),
            fail_publish: Mutex::new(false),
            fail_disconnect: Mutex::new(false),
            ack_sink: Mutex::new(None),
        }
    }

    /// Answer every publish with a `Published` event on `sink`, waiting for
    /// room like a real transport does.
    pub fn ack_publishes(&self, generation: u64, sink: EventSink) {
        *self.ack_sink.lock().unwrap() = Some((generation, sink));
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Get all subscription filters.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Get the last published message.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published.lock().unwrap().last().cloned()
    }

    /// Get published messages for a specific topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Check whether a subscription was made to the given filter.
    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(|(f, _)| f == filter)
    }

    /// Number of `disconnect` calls received.
    pub fn disconnect_count(&self) -> usize {
        *self.disconnects.lock().unwrap()
    }

    /// Make subsequent publishes fail.
    pub fn fail_publish(&self, fail: bool) {
        *self.fail_publish.lock().unwrap() = fail;
    }

    /// Make subsequent disconnects fail, as on a dead transport.
    pub fn fail_disconnect(&self, fail: bool) {
        *self.fail_disconnect.lock().unwrap() = fail;
    }

    /// Clear all recorded state.
    pub fn reset(&self) {
        self.published.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
        *self.disconnects.lock().unwrap() = 0;
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> MqttResult<()> {
        if *self.fail_publish.lock().unwrap() {
            return Err(MqttError::Publish("request queue closed".into()));
        }
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });

        let ack = self.ack_sink.lock().unwrap().clone();
        if let Some((generation, sink)) = ack {
            sink.send(SessionEvent::new(generation, InboundEvent::Published))
                .await
                .map_err(|_| MqttError::Publish("event sink closed".into()))?;
        }
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .push((filter.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        *self.disconnects.lock().unwrap() += 1;
        if *self.fail_disconnect.lock().unwrap() {
            return Err(MqttError::Connection("transport already closed".into()));
        }
        Ok(())
    }
}

// ── MockConnector ─────────────────────────────────────────────

/// A recorded connect call.
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub client_id: String,
    pub username: String,
    pub password: Option<String>,
    pub generation: u64,
}

/// Mock implementation of the `Connector` trait.
///
/// Each successful connect creates a fresh `MockChannel` and, unless
/// disabled, reports `BeforeConnect` and `Connected` on the sink.
pub struct MockConnector {
    attempts: Mutex<Vec<ConnectAttempt>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    sinks: Mutex<Vec<(u64, EventSink)>>,
    failures_remaining: Mutex<u32>,
    send_connack: Mutex<bool>,
    ack_publishes: Mutex<bool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            failures_remaining: Mutex::new(0),
            send_connack: Mutex::new(true),
            ack_publishes: Mutex::new(false),
        }
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_next(&self, count: u32) {
        *self.failures_remaining.lock().unwrap() = count;
    }

    /// Stop reporting `Connected` automatically after connect.
    pub fn hold_connack(&self) {
        *self.send_connack.lock().unwrap() = false;
    }

    /// Have every channel handed out from now on acknowledge its publishes.
    pub fn ack_publishes(&self) {
        *self.ack_publishes.lock().unwrap() = true;
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Number of sessions successfully handed out.
    pub fn connect_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn channels(&self) -> Vec<Arc<MockChannel>> {
        self.channels.lock().unwrap().clone()
    }

    pub fn last_channel(&self) -> Option<Arc<MockChannel>> {
        self.channels.lock().unwrap().last().cloned()
    }

    /// Inject an event as if the latest session's transport produced it.
    pub fn emit(&self, event: InboundEvent) {
        let sinks = self.sinks.lock().unwrap();
        if let Some((generation, sink)) = sinks.last() {
            let _ = sink.try_send(SessionEvent::new(*generation, event));
        }
    }

    /// Inject an event tagged with an explicit generation.
    pub fn emit_for(&self, generation: u64, event: InboundEvent) {
        let sinks = self.sinks.lock().unwrap();
        if let Some((_, sink)) = sinks.last() {
            let _ = sink.try_send(SessionEvent::new(generation, event));
        }
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        identity: &Identity,
        credential: &Credential,
        generation: u64,
        sink: EventSink,
    ) -> MqttResult<Box<dyn Channel>> {
        self.attempts.lock().unwrap().push(ConnectAttempt {
            client_id: identity.client_id().to_string(),
            username: identity.username().to_string(),
            password: credential.password().map(str::to_string),
            generation,
        });

        {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MqttError::Connection("scripted connect failure".into()));
            }
        }

        let channel = Arc::new(MockChannel::new());
        if *self.ack_publishes.lock().unwrap() {
            channel.ack_publishes(generation, sink.clone());
        }
        self.channels.lock().unwrap().push(channel.clone());

        let _ = sink.try_send(SessionEvent::new(generation, InboundEvent::BeforeConnect));
        if *self.send_connack.lock().unwrap() {
            let _ = sink.try_send(SessionEvent::new(generation, InboundEvent::Connected));
        }
        self.sinks.lock().unwrap().push((generation, sink));

        Ok(Box::new(channel))
    }
}
