//! Shared state of the OAuth2 endpoints.

use crate::client::ClientRepo;
use crate::clock::SharedClock;
use crate::connector::ConnectorRegistry;
use crate::key::KeyManager;
use crate::session::SessionManager;
use std::sync::Arc;
use time::Duration;

/// Collaborators handed to every OAuth2 handler.
#[derive(Clone)]
pub struct OAuth2State {
    /// Issuer identifier without a trailing slash.
    pub issuer: String,
    pub clients: Arc<dyn ClientRepo>,
    pub connectors: Arc<ConnectorRegistry>,
    pub sessions: Arc<SessionManager>,
    pub keys: Arc<KeyManager>,
    pub clock: SharedClock,
    /// Lifetime of issued identity tokens
    pub id_token_ttl: Duration,
    /// Whether `register=1` on an authorization request is honoured
    pub enable_registration: bool,
}

impl OAuth2State {
    pub fn new(
        issuer: &str,
        clients: Arc<dyn ClientRepo>,
        connectors: Arc<ConnectorRegistry>,
        sessions: Arc<SessionManager>,
        keys: Arc<KeyManager>,
        clock: SharedClock,
    ) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            clients,
            connectors,
            sessions,
            keys,
            clock,
            id_token_ttl: Duration::hours(1),
            enable_registration: false,
        }
    }

    pub fn with_id_token_ttl(mut self, ttl: Duration) -> Self {
        self.id_token_ttl = ttl;
        self
    }

    pub fn with_registration(mut self, enabled: bool) -> Self {
        self.enable_registration = enabled;
        self
    }

    /// Absolute URL of one of this server's endpoints.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer, path)
    }
}
