//! Agent error types, one enum per failure domain.

use thiserror::Error;

/// Wall-clock synchronization failures.
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("clock did not reach trusted epoch {trusted_epoch} within {timeout_secs}s")]
    Timeout { trusted_epoch: i64, timeout_secs: u64 },

    #[error("time sync request failed: {0}")]
    Request(String),
}

/// Network join failures.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network not connected after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("network join failed: {0}")]
    Join(String),
}

/// Credential issuance failures. Fatal to the current provisioning attempt.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("invalid device key: {0}")]
    InvalidKey(String),

    #[error("failed to load certificate '{path}': {reason}")]
    CertificateLoad { path: String, reason: String },

    #[error("token lifetime must be positive")]
    InvalidLifetime,
}

/// Telemetry encoding failures. The message is dropped.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("telemetry body is {size} bytes, limit is {max}")]
    BufferTooSmall { size: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Scan log failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on '{path}': {reason}")]
    Io { path: String, reason: String },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Anything that aborts a provisioning attempt.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Connect(#[from] sl_mqtt_channel::MqttError),
}
