//! Broker session error types.

use thiserror::Error;

/// Errors that can occur during broker operations.
///
/// Connect-side failures (`Connection`, `Tls`, `NotConnected`,
/// `AlreadySubscribed`, `Subscribe`) send the supervisor back through
/// provisioning; publish-side failures (`Publish`, `SessionUnusable`) only
/// drop the message.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("session has not reported CONNACK yet")]
    NotConnected,

    #[error("already subscribed to '{0}'")]
    AlreadySubscribed(String),

    #[error("session is unusable ({0})")]
    SessionUnusable(&'static str),
}

impl MqttError {
    /// Whether the failure concerns a single message rather than the session.
    pub fn is_publish_side(&self) -> bool {
        matches!(self, Self::Publish(_) | Self::SessionUnusable(_))
    }
}

/// Convenience alias for broker results.
pub type MqttResult<T> = Result<T, MqttError>;
