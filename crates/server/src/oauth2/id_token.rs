//! Identity token claims.

use crate::session::Session;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    /// Local user id attached to the session
    pub sub: String,
    /// Client the token was issued to
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IdTokenClaims {
    /// Claims for a redeemed session. `trusted_email` marks the asserted email
    /// as verified.
    pub fn for_session(
        issuer: &str,
        session: &Session,
        user_id: &str,
        trusted_email: bool,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> Self {
        let identity = session.identity.as_ref();
        let email = identity.and_then(|i| i.email.clone());
        Self {
            iss: issuer.to_string(),
            sub: user_id.to_string(),
            aud: session.client_id.clone(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            nonce: session.nonce.clone(),
            email_verified: email.as_ref().map(|_| trusted_email),
            email,
            name: identity.and_then(|i| i.name.clone()),
        }
    }
}
