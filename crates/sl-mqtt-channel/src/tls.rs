//! Transport selection and TLS configuration.
//!
//! Loads the broker CA certificate from PEM and, for certificate-pair
//! authentication, attaches the device certificate and key as client auth.

use rumqttc::{TlsConfiguration, Transport};

use crate::config::{MqttConfig, TransportScheme};
use crate::error::{MqttError, MqttResult};

/// Build the rumqttc transport for the configured scheme.
///
/// `client_auth` is `(cert_pem, key_pem)` when authenticating with a
/// certificate pair, `None` for token authentication.
pub fn build_transport(
    config: &MqttConfig,
    client_auth: Option<(Vec<u8>, Vec<u8>)>,
) -> MqttResult<Transport> {
    match config.scheme {
        TransportScheme::Mqtt => {
            if client_auth.is_some() {
                return Err(MqttError::Tls(
                    "certificate authentication requires a TLS scheme".into(),
                ));
            }
            Ok(Transport::Tcp)
        }
        TransportScheme::Mqtts => Ok(Transport::tls_with_config(tls_configuration(
            config,
            client_auth,
        )?)),
        TransportScheme::Wss => Ok(Transport::wss_with_config(tls_configuration(
            config,
            client_auth,
        )?)),
    }
}

fn tls_configuration(
    config: &MqttConfig,
    client_auth: Option<(Vec<u8>, Vec<u8>)>,
) -> MqttResult<TlsConfiguration> {
    let ca = std::fs::read(&config.ca_cert_path).map_err(|e| {
        MqttError::Tls(format!(
            "failed to read CA cert '{}': {e}",
            config.ca_cert_path
        ))
    })?;

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}
