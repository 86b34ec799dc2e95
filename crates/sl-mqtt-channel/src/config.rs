use serde::Deserialize;

/// Stream transport carrying the MQTT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportScheme {
    /// Plain TCP (local development brokers only).
    Mqtt,
    /// MQTT over TLS.
    Mqtts,
    /// MQTT over TLS websockets, for networks that only pass port 443.
    #[default]
    Wss,
}

impl TransportScheme {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Mqtt => 1883,
            Self::Mqtts => 8883,
            Self::Wss => 443,
        }
    }

    pub fn uses_tls(self) -> bool {
        !matches!(self, Self::Mqtt)
    }
}

/// MQTT transport configuration, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Transport scheme (default wss).
    #[serde(default)]
    pub scheme: TransportScheme,
    /// Broker port. Defaults to the scheme's well-known port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Path to the CA certificate (PEM) trusted for the broker.
    #[serde(default)]
    pub ca_cert_path: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// Upper bound on waiting for CONNACK.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Pause between transport-level reconnect attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Capacity of the rumqttc request queue.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

impl MqttConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Host argument handed to rumqttc. Websocket transports need the full URL.
    pub fn broker_address(&self, hub_host: &str) -> String {
        match self.scheme {
            TransportScheme::Wss => format!("wss://{hub_host}:{}/$iothub/websocket", self.port()),
            TransportScheme::Mqtt | TransportScheme::Mqtts => hub_host.to_string(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            scheme: TransportScheme::default(),
            port: None,
            ca_cert_path: String::new(),
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            request_capacity: default_request_capacity(),
        }
    }
}

fn default_keepalive() -> u16 {
    30
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_request_capacity() -> usize {
    64
}
