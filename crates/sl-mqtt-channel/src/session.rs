//! Broker session state owned by the supervisor.
//!
//! A `BrokerSession` wraps one connected `Channel`. Status changes are made
//! only through `&mut self`, so the event-loop task can never observe a
//! session halfway through teardown.

use rumqttc::QoS;
use sl_protocol::{Credential, Identity};

use crate::channel::{Channel, Connector};
use crate::error::{MqttError, MqttResult};
use crate::handler::EventSink;

/// Identifier for a subscription issued on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u16);

/// Lifecycle of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Transport open, CONNACK not yet processed.
    Connecting,
    Connected,
    /// Error or disconnect seen; the supervisor must rebuild the session.
    Unusable,
    Destroyed,
}

pub struct BrokerSession {
    channel: Box<dyn Channel>,
    generation: u64,
    status: SessionStatus,
    subscribed_topics: Vec<String>,
    next_subscription: u16,
}

impl BrokerSession {
    pub fn new(channel: Box<dyn Channel>, generation: u64) -> Self {
        Self {
            channel,
            generation,
            status: SessionStatus::Connecting,
            subscribed_topics: Vec::new(),
            next_subscription: 1,
        }
    }

    /// Connect through `connector` and wrap the resulting channel.
    pub async fn establish(
        connector: &dyn Connector,
        identity: &Identity,
        credential: &Credential,
        generation: u64,
        sink: EventSink,
    ) -> MqttResult<Self> {
        let channel = connector
            .connect(identity, credential, generation, sink)
            .await?;
        Ok(Self::new(channel, generation))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// Usable sessions can still publish (CONNACK may be pending).
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Connecting | SessionStatus::Connected
        )
    }

    pub fn subscribed_topics(&self) -> &[String] {
        &self.subscribed_topics
    }

    /// Record CONNACK. A session already marked unusable stays unusable.
    pub fn mark_connected(&mut self) {
        if self.status == SessionStatus::Connecting {
            self.status = SessionStatus::Connected;
        }
    }

    pub fn mark_unusable(&mut self) {
        if self.is_usable() {
            self.status = SessionStatus::Unusable;
        }
    }

    /// Subscribe to `filter`. Rejected before CONNACK and for repeated filters.
    pub async fn subscribe(&mut self, filter: &str, qos: QoS) -> MqttResult<SubscriptionId> {
        match self.status {
            SessionStatus::Connected => {}
            SessionStatus::Connecting => return Err(MqttError::NotConnected),
            SessionStatus::Unusable => return Err(MqttError::SessionUnusable("unusable")),
            SessionStatus::Destroyed => return Err(MqttError::SessionUnusable("destroyed")),
        }
        if self.subscribed_topics.iter().any(|t| t == filter) {
            return Err(MqttError::AlreadySubscribed(filter.to_string()));
        }

        self.channel.subscribe(filter, qos).await?;

        let id = SubscriptionId(self.next_subscription);
        self.next_subscription = self.next_subscription.wrapping_add(1);
        self.subscribed_topics.push(filter.to_string());
        Ok(id)
    }

    /// Queue a publish. Fire-and-forget: acknowledgement arrives as an event.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> MqttResult<()> {
        match self.status {
            SessionStatus::Connecting | SessionStatus::Connected => {
                self.channel.publish(topic, payload, qos, retain).await
            }
            SessionStatus::Unusable => Err(MqttError::SessionUnusable("unusable")),
            SessionStatus::Destroyed => Err(MqttError::SessionUnusable("destroyed")),
        }
    }

    /// Release all session resources.
    ///
    /// Returns `true` if this call performed the teardown, `false` if the
    /// session was already destroyed.
    pub async fn destroy(&mut self) -> bool {
        if self.status == SessionStatus::Destroyed {
            return false;
        }
        self.status = SessionStatus::Destroyed;
        self.subscribed_topics.clear();
        if let Err(e) = self.channel.disconnect().await {
            tracing::debug!(generation = self.generation, error = %e, "disconnect during destroy failed");
        }
        true
    }
}

impl std::fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession")
            .field("generation", &self.generation)
            .field("status", &self.status)
            .field("subscribed_topics", &self.subscribed_topics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChannel;
    use std::sync::Arc;

    fn session() -> (Arc<MockChannel>, BrokerSession) {
        let mock = Arc::new(MockChannel::new());
        let session = BrokerSession::new(Box::new(mock.clone()), 1);
        (mock, session)
    }

    #[tokio::test]
    async fn subscribe_before_connack_rejected() {
        let (mock, mut session) = session();
        let err = session
            .subscribe("devices/d/messages/devicebound/#", QoS::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::NotConnected));
        assert!(mock.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn subscribe_once_per_filter() {
        let (mock, mut session) = session();
        session.mark_connected();

        let id = session
            .subscribe("inbox/#", QoS::AtLeastOnce)
            .await
            .unwrap();
        assert_eq!(id, SubscriptionId(1));

        let err = session
            .subscribe("inbox/#", QoS::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::AlreadySubscribed(_)));
        assert_eq!(mock.subscriptions().len(), 1);
        assert_eq!(session.subscribed_topics(), ["inbox/#".to_string()]);
    }

    #[tokio::test]
    async fn publish_passes_qos_and_retain() {
        let (mock, session) = session();
        session
            .publish("t", b"{}", QoS::AtLeastOnce, false)
            .await
            .unwrap();
        let msgs = mock.published();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].qos, QoS::AtLeastOnce);
        assert!(!msgs[0].retain);
    }

    #[tokio::test]
    async fn unusable_session_rejects_publish() {
        let (mock, mut session) = session();
        session.mark_connected();
        session.mark_unusable();
        assert!(!session.is_usable());

        let err = session
            .publish("t", b"x", QoS::AtLeastOnce, false)
            .await
            .unwrap_err();
        assert!(err.is_publish_side());
        assert!(mock.published().is_empty());

        // A late CONNACK does not revive it.
        session.mark_connected();
        assert_eq!(session.status(), SessionStatus::Unusable);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let (mock, mut session) = session();
        session.mark_connected();

        assert!(session.destroy().await);
        assert!(!session.destroy().await);
        assert_eq!(mock.disconnect_count(), 1);
        assert_eq!(session.status(), SessionStatus::Destroyed);

        let err = session
            .publish("t", b"x", QoS::AtLeastOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::SessionUnusable("destroyed")));
    }

    #[tokio::test]
    async fn destroy_tolerates_dead_transport() {
        let (mock, mut session) = session();
        mock.fail_disconnect(true);
        session.mark_unusable();
        assert!(session.destroy().await);
        assert!(!session.destroy().await);
    }
}
