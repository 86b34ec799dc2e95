//! Broker session for ScanLink.
//!
//! Provides the publish/subscribe session the edge agent talks through:
//! - `Channel` trait for publish/subscribe/disconnect (mockable in tests)
//! - `Connector` trait and `MqttConnector` establishing rumqttc sessions
//! - `BrokerSession` tracking connection status and the one-time subscription
//! - `InboundEvent` classification and the event-loop driver
//! - `MockChannel` / `MockConnector` for testing without a broker
//! - `LoopbackBroker` for testing the real transport on 127.0.0.1

pub mod channel;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod handler;
pub mod loopback;
pub mod mock;
pub mod session;
pub mod tls;

// Re-exports for convenience.
pub use channel::{Channel, Connector, MqttChannel, MqttConnector};
pub use config::{MqttConfig, TransportScheme};
pub use error::{MqttError, MqttResult};
pub use handler::{EventSink, InboundEvent, SessionEvent, classify};
pub use loopback::LoopbackBroker;
pub use mock::{MockChannel, MockConnector};
pub use rumqttc::QoS;
pub use session::{BrokerSession, SessionStatus, SubscriptionId};
