//! Credential provisioning: signed access tokens and certificate pairs.
//!
//! Token layout:
//! ```text
//! resource  = {hub_host}/devices/{device_id}
//! to_sign   = url_encode(resource) + "\n" + expiry_epoch
//! signature = base64(HMAC-SHA256(device_key, to_sign))
//! token     = SharedAccessSignature sr={url_encode(resource)}&sig={url_encode(signature)}&se={expiry_epoch}
//! ```

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sl_protocol::{CertificatePair, Credential, Identity, SignedToken, url_encode};

use crate::clock::Clock;
use crate::error::CredentialError;

/// Injected signing capability.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CredentialError>;
}

/// HMAC-SHA256 signer keyed with the symmetric device key.
pub struct DeviceKeySigner {
    key: Vec<u8>,
}

impl DeviceKeySigner {
    /// Build a signer from a base64 device key. An empty key is accepted
    /// here and rejected at signing time.
    pub fn from_base64(key: &str) -> Result<Self, CredentialError> {
        let key = STANDARD
            .decode(key.trim())
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }
}

impl Signer for DeviceKeySigner {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CredentialError> {
        if self.key.is_empty() {
            return Err(CredentialError::SigningFailed(
                "no device key material available".into(),
            ));
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
            .map_err(|e| CredentialError::SigningFailed(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// How the device authenticates.
#[derive(Clone)]
pub enum AuthStrategy {
    SignedToken {
        signer: Arc<dyn Signer>,
        lifetime_minutes: u32,
    },
    CertificatePair {
        cert_path: String,
        key_path: String,
    },
}

/// Issues credentials for the device identity.
pub struct CredentialProvider {
    clock: Arc<dyn Clock>,
    strategy: AuthStrategy,
}

impl CredentialProvider {
    pub fn new(clock: Arc<dyn Clock>, strategy: AuthStrategy) -> Self {
        Self { clock, strategy }
    }

    pub fn is_expired(&self, credential: &Credential) -> bool {
        credential.is_expired(self.clock.now())
    }

    pub async fn issue(&self, identity: &Identity) -> Result<Credential, CredentialError> {
        match &self.strategy {
            AuthStrategy::SignedToken {
                signer,
                lifetime_minutes,
            } => {
                let token = issue_signed_token(
                    identity,
                    signer.as_ref(),
                    *lifetime_minutes,
                    self.clock.now(),
                )?;
                tracing::info!(
                    device_id = %identity.device_id(),
                    expiry_epoch = token.expiry_epoch,
                    "signed token generated"
                );
                Ok(Credential::SignedToken(token))
            }
            AuthStrategy::CertificatePair {
                cert_path,
                key_path,
            } => {
                let cert_pem = read_pem(cert_path).await?;
                let key_pem = read_pem(key_path).await?;
                tracing::info!("using X509 certificate authentication");
                Ok(Credential::CertificatePair(CertificatePair {
                    cert_pem,
                    key_pem,
                }))
            }
        }
    }
}

/// Sign a token valid from `now` for `lifetime_minutes`.
pub fn issue_signed_token(
    identity: &Identity,
    signer: &dyn Signer,
    lifetime_minutes: u32,
    now: DateTime<Utc>,
) -> Result<SignedToken, CredentialError> {
    if lifetime_minutes == 0 {
        return Err(CredentialError::InvalidLifetime);
    }
    let expiry_epoch = now.timestamp() + i64::from(lifetime_minutes) * 60;

    let resource = url_encode(&format!(
        "{}/devices/{}",
        identity.hub_host(),
        identity.device_id()
    ));
    let to_sign = format!("{resource}\n{expiry_epoch}");
    let signature = STANDARD.encode(signer.sign(to_sign.as_bytes())?);
    let token = format!(
        "SharedAccessSignature sr={resource}&sig={}&se={expiry_epoch}",
        url_encode(&signature)
    );

    Ok(SignedToken {
        token,
        signature,
        expiry_epoch,
    })
}

async fn read_pem(path: &str) -> Result<Vec<u8>, CredentialError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| CredentialError::CertificateLoad {
            path: path.to_string(),
            reason: e.to_string(),
        })
}
