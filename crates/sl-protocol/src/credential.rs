//! Broker credentials: a signed, time-bounded token or a certificate pair.

use std::fmt;

use chrono::{DateTime, Utc};

/// Credential presented to the broker at connect time.
///
/// Only `SignedToken` expires; a session authenticated with a certificate
/// pair never needs renewal.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    SignedToken(SignedToken),
    CertificatePair(CertificatePair),
}

/// Shared-access token with its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// Full token string, sent as the MQTT password.
    pub token: String,
    /// Base64 signature embedded in `token`.
    pub signature: String,
    /// Seconds since the UNIX epoch after which the token is rejected.
    pub expiry_epoch: i64,
}

/// PEM-encoded client certificate and private key.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificatePair {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl Credential {
    /// True once `now` has reached the token expiry. Certificates never expire here.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::SignedToken(token) => now.timestamp() >= token.expiry_epoch,
            Self::CertificatePair(_) => false,
        }
    }

    pub fn expiry_epoch(&self) -> Option<i64> {
        match self {
            Self::SignedToken(token) => Some(token.expiry_epoch),
            Self::CertificatePair(_) => None,
        }
    }

    /// MQTT password for this credential, if any.
    pub fn password(&self) -> Option<&str> {
        match self {
            Self::SignedToken(token) => Some(&token.token),
            Self::CertificatePair(_) => None,
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedToken(token) => token.fmt(f),
            Self::CertificatePair(pair) => pair.fmt(f),
        }
    }
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("expiry_epoch", &self.expiry_epoch)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for CertificatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificatePair")
            .field("cert_bytes", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
