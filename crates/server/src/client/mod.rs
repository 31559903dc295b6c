//! Registered OAuth2 clients.
//!
//! A [`ClientRepo`] resolves client ids to their credentials and registered
//! redirect targets. Two backends exist: [`MemClientRepo`] for statically
//! configured clients and [`DbClientRepo`] for a sea-orm database.

mod db;
mod memory;

pub use db::DbClientRepo;
pub use memory::MemClientRepo;

use crate::error::StorageError;
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientRegistryError {
    #[error("client id must not be empty")]
    EmptyId,
    #[error("client {0} has no redirect URIs")]
    NoRedirectUris(String),
    #[error("client {id} redirect URI {uri} is not usable: {reason}")]
    InvalidRedirectUri {
        id: String,
        uri: String,
        reason: String,
    },
    #[error("duplicate client id {0}")]
    Duplicate(String),
}

/// A registered client application.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Client {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub name: Option<String>,
    pub redirect_uris: Vec<Url>,
}

impl Client {
    /// Checks the invariants every registered client must hold.
    pub fn validate(&self) -> Result<(), ClientRegistryError> {
        if self.id.trim().is_empty() {
            return Err(ClientRegistryError::EmptyId);
        }
        if self.redirect_uris.is_empty() {
            return Err(ClientRegistryError::NoRedirectUris(self.id.clone()));
        }
        for uri in &self.redirect_uris {
            let reason = if uri.cannot_be_a_base() {
                Some("not an absolute hierarchical URL")
            } else if uri.fragment().is_some() {
                Some("must not contain a fragment")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ClientRegistryError::InvalidRedirectUri {
                    id: self.id.clone(),
                    uri: uri.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the registered redirect URI whose text equals `requested`, if any.
    /// The request is not normalised, so case, default ports and dot segments
    /// must match the registration verbatim.
    pub fn registered_redirect(&self, requested: &str) -> Option<&Url> {
        self.redirect_uris
            .iter()
            .find(|uri| uri.as_str() == requested)
    }

    /// The implied redirect target when a request omits `redirect_uri`.
    /// Only defined when exactly one target is registered.
    pub fn sole_redirect(&self) -> Option<&Url> {
        match self.redirect_uris.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Credentials presented by a client at the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub id: String,
    pub secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Compares two secrets without short-circuiting on the first differing byte.
///
/// Both sides are hashed first so the comparison length never depends on the
/// stored secret.
pub fn secrets_match(stored: &str, provided: &str) -> bool {
    let a = Sha256::digest(stored.as_bytes());
    let b = Sha256::digest(provided.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
pub trait ClientRepo: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Client>, StorageError>;

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.get(id).await?.is_some())
    }

    /// Resolves the client only when the secret matches.
    async fn authenticate(
        &self,
        creds: &ClientCredentials,
    ) -> Result<Option<Client>, StorageError> {
        let Some(client) = self.get(&creds.id).await? else {
            return Ok(None);
        };
        if secrets_match(&client.secret, &creds.secret) {
            Ok(Some(client))
        } else {
            Ok(None)
        }
    }
}

/// Validates a batch of clients, including id uniqueness across the batch.
pub fn validate_clients(clients: &[Client]) -> Result<(), ClientRegistryError> {
    let mut seen = HashSet::new();
    for client in clients {
        client.validate()?;
        if !seen.insert(client.id.as_str()) {
            return Err(ClientRegistryError::Duplicate(client.id.clone()));
        }
    }
    Ok(())
}
