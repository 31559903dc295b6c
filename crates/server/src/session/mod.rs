//! Authorization sessions and their one-time codes.
//!
//! A session tracks a single authorization flow from the initial request,
//! through the federated login, to the exchange of its code at the token
//! endpoint. Lifecycle:
//!
//! `Created -> IdentityAttached -> UserAttached -> CodeIssued -> Redeemed`
//!
//! Expiry ends a session from any non-terminal state. Redeemed and expired
//! sessions are removed from storage, so later lookups see `NotFound`.

mod manager;
mod repo;

pub use manager::{SessionConfig, SessionManager};
pub use repo::{MemSessionKeyRepo, MemSessionRepo, SessionKeyRepo, SessionRepo};

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("invalid code")]
    InvalidCode,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    IdentityAttached,
    UserAttached,
    CodeIssued,
    Redeemed,
}

/// Claims asserted by the upstream identity source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Parameters of a new authorization session.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub connector_id: String,
    pub client_id: String,
    pub client_state: String,
    pub redirect_uri: Url,
    pub nonce: Option<String>,
    pub register: bool,
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub connector_id: String,
    pub client_id: String,
    pub client_state: String,
    pub redirect_uri: Url,
    pub nonce: Option<String>,
    pub register: bool,
    pub scopes: Vec<String>,
    pub identity: Option<RemoteIdentity>,
    pub user_id: Option<String>,
    /// The only code currently able to redeem this session.
    pub code: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// A one-time authorization code bound to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionKey {
    pub code: String,
    pub session_id: String,
    pub expires_at: OffsetDateTime,
}

impl SessionKey {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// Generate an unguessable URL-safe token (256 bits of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).expect("Failed to generate random bytes");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
