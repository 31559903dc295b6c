//! Pluggable upstream identity sources.
//!
//! The server only talks to connectors through the [`Connector`] trait. A
//! connector sends the user agent away for the federated login and, when the
//! upstream redirects back to `/callback/{connector_id}`, turns the callback
//! parameters into the session id and the asserted identity.

mod oidc;

pub use oidc::{UpstreamOidcConfig, UpstreamOidcConnector};

use crate::session::RemoteIdentity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("duplicate connector id {0}")]
    Duplicate(String),
    #[error("connector id must not be empty")]
    EmptyId,
    #[error("failed to build login URL: {0}")]
    LoginUrl(String),
    #[error("connector unhealthy: {0}")]
    Unhealthy(String),
    #[error("malformed login callback: {0}")]
    Callback(String),
    /// The upstream refused the login of a known session.
    #[error("login denied for session {session_id}: {reason}")]
    Denied { session_id: String, reason: String },
    #[error("upstream exchange failed: {0}")]
    Upstream(String),
    #[error("failed to set up connector: {0}")]
    Setup(String),
}

/// Result of a successful federated login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginCallback {
    pub session_id: String,
    pub identity: RemoteIdentity,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn id(&self) -> &str;

    /// URL the user agent is sent to for the federated login of `session_id`.
    /// `reprompt` asks the upstream to force a fresh credential prompt.
    fn login_url(&self, session_id: &str, reprompt: bool) -> Result<String, ConnectorError>;

    /// Resolves the query parameters the upstream redirected back with.
    async fn handle_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<LoginCallback, ConnectorError> {
        let _ = params;
        Err(ConnectorError::Callback(format!(
            "connector {} does not accept callbacks",
            self.id()
        )))
    }

    fn healthy(&self) -> Result<(), ConnectorError>;

    /// Whether emails asserted by this connector are considered verified.
    fn trusted_email_provider(&self) -> bool;

    /// Receives a notification each time the connector's configuration refreshes.
    fn sync(&self) -> Option<watch::Receiver<()>>;
}

/// Connectors keyed by id.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new(connectors: Vec<Arc<dyn Connector>>) -> Result<Self, ConnectorError> {
        let mut map = HashMap::with_capacity(connectors.len());
        for c in connectors {
            let id = c.id().to_string();
            if id.is_empty() {
                return Err(ConnectorError::EmptyId);
            }
            if map.insert(id.clone(), c).is_some() {
                return Err(ConnectorError::Duplicate(id));
            }
        }
        Ok(Self { connectors: map })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Connector>> {
        self.connectors.get(id)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Health of every connector, sorted by id.
    pub fn health(&self) -> Vec<(String, Result<(), ConnectorError>)> {
        let mut report: Vec<_> = self
            .connectors
            .iter()
            .map(|(id, c)| (id.clone(), c.healthy()))
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Spawns one task per connector that logs its configuration refreshes.
    /// Each task ends when the connector drops its sender.
    pub fn watch_sync(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.connectors
            .iter()
            .filter_map(|(id, c)| c.sync().map(|rx| (id.clone(), rx)))
            .map(|(id, mut rx)| {
                tokio::spawn(async move {
                    while rx.changed().await.is_ok() {
                        tracing::info!(connector_id = %id, "Connector configuration refreshed");
                    }
                    tracing::debug!(connector_id = %id, "Connector sync channel closed");
                })
            })
            .collect()
    }
}
