//! Token signing keys and the published verification key set.
//!
//! The active [`KeySet`] is an immutable snapshot behind an `Arc`; rotation
//! builds a complete new set and swaps the pointer, so readers always see a
//! set together with its own expiry.

use crate::clock::SharedClock;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::{
    BigUint, RsaPrivateKey,
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    traits::PublicKeyParts,
};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

pub const KEY_TYPE: &str = "RSA";
pub const SIGNING_ALG: &str = "RS256";
pub const KEY_USE: &str = "sig";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid PKCS#1 key: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("Failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
    #[error("No active signing key")]
    NoSigningKey,
    #[error("Key generation task failed: {0}")]
    Join(String),
}

/// Private RSA key used to sign identity tokens.
pub struct SigningKey {
    id: String,
    private: RsaPrivateKey,
    encoding: EncodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn from_pkcs1_pem(id: impl Into<String>, pem: &str) -> Result<Self, KeyError> {
        Self::from_private(id.into(), RsaPrivateKey::from_pkcs1_pem(pem)?)
    }

    /// Generates a fresh key with a random id. CPU heavy; run off the async workers.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)?;
        Self::from_private(uuid::Uuid::new_v4().to_string(), private)
    }

    fn from_private(id: String, private: RsaPrivateKey) -> Result<Self, KeyError> {
        let der = private.to_pkcs1_der()?;
        let encoding = EncodingKey::from_rsa_der(der.as_bytes());
        Ok(Self {
            id,
            private,
            encoding,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.id.clone(),
            n: self.private.n().clone(),
            e: self.private.e().clone(),
        }
    }

    /// Signs `claims` as an RS256 JWT carrying this key's id.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.id.clone());
        Ok(jsonwebtoken::encode(&header, claims, &self.encoding)?)
    }
}

/// Public half of an RSA signing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub kid: String,
    pub n: BigUint,
    pub e: BigUint,
}

impl PublicKey {
    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kid: self.kid.clone(),
            kty: KEY_TYPE.to_string(),
            alg: SIGNING_ALG.to_string(),
            use_: KEY_USE.to_string(),
            e: URL_SAFE.encode(self.e.to_bytes_be()),
            n: URL_SAFE.encode(self.n.to_bytes_be()),
        }
    }
}

/// JSON Web Key as published on the keys endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub use_: String,
    /// Public exponent, unsigned big-endian padded base64url.
    pub e: String,
    /// Modulus, unsigned big-endian padded base64url.
    pub n: String,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// One published generation of keys.
#[derive(Debug)]
pub struct KeySet {
    /// Key new tokens are signed with. Always the first entry of `keys`.
    pub signer: Option<Arc<SigningKey>>,
    pub keys: Vec<PublicKey>,
    pub expires_at: OffsetDateTime,
}

impl KeySet {
    pub fn to_jwk_set(&self) -> JwkSet {
        JwkSet {
            keys: self.keys.iter().map(PublicKey::to_jwk).collect(),
        }
    }
}

pub struct KeyManager {
    current: RwLock<Arc<KeySet>>,
    keep_previous: usize,
}

impl KeyManager {
    pub fn new(signer: SigningKey, expires_at: OffsetDateTime, keep_previous: usize) -> Self {
        let keys = vec![signer.public_key()];
        Self {
            current: RwLock::new(Arc::new(KeySet {
                signer: Some(Arc::new(signer)),
                keys,
                expires_at,
            })),
            keep_previous,
        }
    }

    /// Publishes a fixed set of verification keys with no signer.
    pub fn from_public_keys(keys: Vec<PublicKey>, expires_at: OffsetDateTime) -> Self {
        Self {
            current: RwLock::new(Arc::new(KeySet {
                signer: None,
                keys,
                expires_at,
            })),
            keep_previous: 0,
        }
    }

    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn signer(&self) -> Result<Arc<SigningKey>, KeyError> {
        self.snapshot().signer.clone().ok_or(KeyError::NoSigningKey)
    }

    /// Makes `signer` the active key. Up to `keep_previous` earlier public keys
    /// stay published so tokens they signed can still be verified.
    pub fn rotate(&self, signer: SigningKey, expires_at: OffsetDateTime) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut keys = Vec::with_capacity(self.keep_previous + 1);
        keys.push(signer.public_key());
        keys.extend(current.keys.iter().take(self.keep_previous).cloned());
        tracing::info!(kid = %signer.id(), published = keys.len(), %expires_at, "Rotated signing key");
        *current = Arc::new(KeySet {
            signer: Some(Arc::new(signer)),
            keys,
            expires_at,
        });
    }
}

/// Replaces the signing key every `every`. Each new set expires one period
/// after its creation.
pub fn spawn_rotation_task(
    keys: Arc<KeyManager>,
    clock: SharedClock,
    every: std::time::Duration,
    bits: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; the startup key is still fresh.
        interval.tick().await;
        loop {
            interval.tick().await;
            match generate_blocking(bits).await {
                Ok(signer) => keys.rotate(signer, clock.now() + every),
                Err(e) => tracing::error!(error = %e, "Key rotation failed"),
            }
        }
    })
}

pub async fn generate_blocking(bits: usize) -> Result<SigningKey, KeyError> {
    tokio::task::spawn_blocking(move || SigningKey::generate(bits))
        .await
        .map_err(|e| KeyError::Join(e.to_string()))?
}
