//! MQTT channel: async client for the device's broker session.
//!
//! Wraps `rumqttc::AsyncClient` behind the `Channel` trait and provides
//! the `MqttConnector` that performs the CONNECT handshake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use sl_protocol::{Credential, Identity};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::event_loop;
use crate::handler::{EventSink, InboundEvent, SessionEvent};
use crate::tls;

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for MQTT message publishing and subscribing.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Queue a payload for publishing. Delivery is confirmed later by a
    /// `Published` event, not by this return value.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
    -> MqttResult<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()>;

    /// Close the session and release transport resources. Safe to repeat.
    async fn disconnect(&self) -> MqttResult<()>;
}

#[async_trait]
impl<T: Channel + ?Sized> Channel for Arc<T> {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> MqttResult<()> {
        (**self).publish(topic, payload, qos, retain).await
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        (**self).subscribe(filter, qos).await
    }

    async fn disconnect(&self) -> MqttResult<()> {
        (**self).disconnect().await
    }
}

// ── Connector trait ───────────────────────────────────────────

/// Establishes broker sessions.
///
/// Implementations report transport events on `sink`, tagged with
/// `generation`, for as long as the returned channel lives.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        identity: &Identity,
        credential: &Credential,
        generation: u64,
        sink: EventSink,
    ) -> MqttResult<Box<dyn Channel>>;
}

// ── MqttChannel ───────────────────────────────────────────────

/// Live rumqttc session.
///
/// Owns the `AsyncClient` and the task driving its `EventLoop`.
pub struct MqttChannel {
    client: AsyncClient,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttChannel {
    fn new(client: AsyncClient, driver: JoinHandle<()>) -> Self {
        Self {
            client,
            driver: Mutex::new(Some(driver)),
        }
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> MqttResult<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    async fn disconnect(&self) -> MqttResult<()> {
        let Some(driver) = self.driver.lock().await.take() else {
            return Ok(());
        };

        // The transport may already be gone; a failed DISCONNECT is not an error here.
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "DISCONNECT not queued");
        }
        driver.abort();
        Ok(())
    }
}

// ── MqttConnector ─────────────────────────────────────────────

/// Opens rumqttc sessions using the configured transport.
pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Build connection options for an identity and credential.
    pub fn options(&self, identity: &Identity, credential: &Credential) -> MqttResult<MqttOptions> {
        let mut options = MqttOptions::new(
            identity.client_id(),
            self.config.broker_address(identity.hub_host()),
            self.config.port(),
        );
        options.set_keep_alive(Duration::from_secs(self.config.keepalive_secs.into()));
        options.set_clean_session(true);

        let client_auth = match credential {
            Credential::SignedToken(token) => {
                options.set_credentials(identity.username(), token.token.as_str());
                None
            }
            Credential::CertificatePair(pair) => {
                options.set_credentials(identity.username(), "");
                Some((pair.cert_pem.clone(), pair.key_pem.clone()))
            }
        };

        options.set_transport(tls::build_transport(&self.config, client_auth)?);
        Ok(options)
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(
        &self,
        identity: &Identity,
        credential: &Credential,
        generation: u64,
        sink: EventSink,
    ) -> MqttResult<Box<dyn Channel>> {
        let options = self.options(identity, credential)?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.request_capacity);

        notify(&sink, generation, InboundEvent::BeforeConnect);

        let deadline = Duration::from_secs(self.config.connect_timeout_secs);
        tokio::time::timeout(deadline, await_connack(&mut eventloop))
            .await
            .map_err(|_| {
                MqttError::Connection(format!(
                    "no CONNACK within {}s",
                    self.config.connect_timeout_secs
                ))
            })??;

        tracing::info!(
            client_id = %identity.client_id(),
            generation,
            "MQTT session established"
        );
        notify(&sink, generation, InboundEvent::Connected);

        let reconnect_delay = Duration::from_secs(self.config.reconnect_delay_secs);
        let driver = tokio::spawn(event_loop::drive(
            eventloop,
            generation,
            sink,
            reconnect_delay,
        ));

        Ok(Box::new(MqttChannel::new(client, driver)))
    }
}

/// Report a handshake event without waiting on a full sink.
fn notify(sink: &EventSink, generation: u64, event: InboundEvent) {
    if let Err(e) = sink.try_send(SessionEvent::new(generation, event)) {
        tracing::warn!(generation, error = %e, "dropped handshake event");
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> MqttResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == rumqttc::ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(MqttError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(MqttError::Connection(e.to_string())),
        }
    }
}
