//! Edge agent configuration, loadable from TOML.

use std::time::Duration;

use serde::Deserialize;
use sl_mqtt_channel::MqttConfig;

use crate::error::ConfigError;

/// Top-level configuration for the edge agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Device identifier registered with the hub.
    pub device_id: String,
    /// Hub hostname (e.g., "my-hub.azure-devices.net").
    pub hub_host: String,
    /// Identity stamped on telemetry as `macChars`. Defaults to the
    /// interface MAC address, then the device id.
    #[serde(default)]
    pub receptor_id: Option<String>,
    /// Network interface whose link state gates the session.
    #[serde(default = "default_interface")]
    pub network_interface: String,
    /// Scan records at or below this RSSI are not published.
    #[serde(default = "default_rssi_threshold")]
    pub rssi_threshold: i16,
    /// Supervisory tick period in seconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Directory for the CSV scan log. None disables it.
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Broker authentication.
    pub auth: AuthConfig,
    /// MQTT transport settings.
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Wall-clock synchronization.
    #[serde(default)]
    pub clock: ClockConfig,
    /// Retry and wait bounds.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Authentication mode, selected at configuration time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Signed, time-bounded token derived from a symmetric device key.
    SasToken {
        /// Base64 device key.
        device_key: String,
        #[serde(default = "default_token_lifetime")]
        token_lifetime_minutes: u32,
    },
    /// Long-lived client certificate pair. No renewal.
    X509 { cert_path: String, key_path: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_ntp_servers")]
    pub ntp_servers: Vec<String>,
    /// Earliest wall-clock time (UNIX seconds) considered trustworthy.
    #[serde(default = "default_trusted_epoch")]
    pub trusted_epoch: i64,
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before retrying a failed provisioning or network wait.
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Upper bound on waiting for the network to come up.
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ntp_servers: default_ntp_servers(),
            trusted_epoch: default_trusted_epoch(),
            sync_timeout_secs: default_sync_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff(),
            network_timeout_secs: default_network_timeout(),
        }
    }
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_rssi_threshold() -> i16 {
    -76
}

fn default_tick_interval() -> u64 {
    60
}

fn default_token_lifetime() -> u32 {
    60
}

fn default_ntp_servers() -> Vec<String> {
    vec!["pool.ntp.org".to_string(), "time.nist.gov".to_string()]
}

fn default_trusted_epoch() -> i64 {
    // 2017-11-13T17:07:05Z
    1_510_592_825
}

fn default_sync_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    500
}

fn default_backoff() -> u64 {
    10
}

fn default_network_timeout() -> u64 {
    60
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the supervisor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("tick_interval_secs must be > 0".into()));
        }
        if self.retry.backoff_secs == 0 {
            return Err(ConfigError::Invalid("retry.backoff_secs must be > 0".into()));
        }
        if self.retry.network_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "retry.network_timeout_secs must be > 0".into(),
            ));
        }
        if self.clock.sync_timeout_secs == 0 || self.clock.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "clock timeouts and poll interval must be > 0".into(),
            ));
        }
        if let AuthConfig::SasToken {
            token_lifetime_minutes: 0,
            ..
        } = self.auth
        {
            return Err(ConfigError::Invalid(
                "auth.token_lifetime_minutes must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}
