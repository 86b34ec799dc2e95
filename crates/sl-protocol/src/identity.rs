//! Device identity derived once at boot from configuration.
//!
//! Every string lives in a fixed-capacity buffer. Derivation rejects
//! inputs that would overflow instead of truncating them, because a
//! truncated client id or username authenticates as a different device.

use heapless::String as BoundedString;
use thiserror::Error;

/// Capacity of every identity field, in bytes.
pub const IDENTITY_FIELD_CAPACITY: usize = 128;

/// Broker API version advertised in the MQTT username.
pub const API_VERSION: &str = "2021-04-12";

/// Percent-encoded client type advertised in the MQTT username.
pub const CLIENT_USER_AGENT: &str = concat!("c%2Fscanlink%2F", env!("CARGO_PKG_VERSION"));

pub type IdentityString = BoundedString<IDENTITY_FIELD_CAPACITY>;

/// Errors that can occur while deriving an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} is {len} bytes, exceeds the {max}-byte limit")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Immutable connection identity of this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub device_id: IdentityString,
    pub hub_host: IdentityString,
    pub client_id: IdentityString,
    pub username: IdentityString,
}

impl Identity {
    /// Derive client id and username from the hub hostname and device id.
    pub fn derive(hub_host: &str, device_id: &str) -> Result<Self, IdentityError> {
        let hub_host = hub_host.trim();
        let device_id = device_id.trim();
        if hub_host.is_empty() {
            return Err(IdentityError::Empty { field: "hub_host" });
        }
        if device_id.is_empty() {
            return Err(IdentityError::Empty { field: "device_id" });
        }

        let username = format!(
            "{hub_host}/{device_id}/?api-version={API_VERSION}&DeviceClientType={CLIENT_USER_AGENT}"
        );

        Ok(Self {
            device_id: bounded("device_id", device_id)?,
            hub_host: bounded("hub_host", hub_host)?,
            client_id: bounded("client_id", device_id)?,
            username: bounded("username", &username)?,
        })
    }

    pub fn device_id(&self) -> &str {
        self.device_id.as_str()
    }

    pub fn hub_host(&self) -> &str {
        self.hub_host.as_str()
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_str()
    }

    pub fn username(&self) -> &str {
        self.username.as_str()
    }
}

fn bounded(field: &'static str, value: &str) -> Result<IdentityString, IdentityError> {
    IdentityString::try_from(value).map_err(|_| IdentityError::TooLong {
        field,
        len: value.len(),
        max: IDENTITY_FIELD_CAPACITY,
    })
}
