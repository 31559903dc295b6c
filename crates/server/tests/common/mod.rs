//! Shared fixtures for the HTTP tests.

#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue, header};
use axum_test::TestServer;
use base64::Engine;
use federated_oidc::api;
use federated_oidc::client::{Client, MemClientRepo};
use federated_oidc::clock::FakeClock;
use async_trait::async_trait;
use federated_oidc::connector::{Connector, ConnectorError, ConnectorRegistry, LoginCallback};
use federated_oidc::key::{KeyManager, SigningKey};
use federated_oidc::oauth2::OAuth2State;
use federated_oidc::session::{RemoteIdentity, SessionConfig, SessionManager};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::Duration;
use tokio::sync::watch;
use url::Url;

pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/signing_key.pem");
pub const ISSUER: &str = "http://server.example.com";
pub const REDIRECT_URL: &str = "http://client.example.com/callback";

/// Secret of client `XXX`, as registered.
pub fn client_secret() -> String {
    base64::engine::general_purpose::URL_SAFE.encode("secrete")
}

pub fn client(id: &str, secret: &str, redirect_uris: &[&str]) -> Client {
    Client {
        id: id.into(),
        secret: secret.into(),
        name: None,
        redirect_uris: redirect_uris
            .iter()
            .map(|u| Url::parse(u).expect("valid redirect uri"))
            .collect(),
    }
}

/// Connector returning a fixed login URL and recording every call.
///
/// Its callback takes the session from `state`, the remote id from `sub` and
/// optional `email` and `name`; `error` denies the login.
pub struct FakeConnector {
    pub id: String,
    pub login_url: String,
    pub healthy: bool,
    pub trusted_email: bool,
    pub calls: Mutex<Vec<(String, bool)>>,
}

impl FakeConnector {
    pub fn new(id: &str, login_url: &str) -> Self {
        Self {
            id: id.into(),
            login_url: login_url.into(),
            healthy: true,
            trusted_email: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(session_id, reprompt)` of each login URL request.
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn id(&self) -> &str {
        &self.id
    }

    fn login_url(&self, session_id: &str, reprompt: bool) -> Result<String, ConnectorError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((session_id.to_string(), reprompt));
        Ok(self.login_url.clone())
    }

    async fn handle_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<LoginCallback, ConnectorError> {
        let session_id = params
            .get("state")
            .cloned()
            .ok_or_else(|| ConnectorError::Callback("missing state".into()))?;
        if let Some(reason) = params.get("error") {
            return Err(ConnectorError::Denied {
                session_id,
                reason: reason.clone(),
            });
        }
        let id = params
            .get("sub")
            .cloned()
            .ok_or_else(|| ConnectorError::Callback("missing sub".into()))?;
        Ok(LoginCallback {
            session_id,
            identity: RemoteIdentity {
                id,
                name: params.get("name").cloned(),
                email: params.get("email").cloned(),
            },
        })
    }

    fn healthy(&self) -> Result<(), ConnectorError> {
        if self.healthy {
            Ok(())
        } else {
            Err(ConnectorError::Unhealthy("im unhealthy".into()))
        }
    }

    fn trusted_email_provider(&self) -> bool {
        self.trusted_email
    }

    fn sync(&self) -> Option<watch::Receiver<()>> {
        None
    }
}

pub struct Fixture {
    pub state: OAuth2State,
    pub clock: FakeClock,
    pub sessions: Arc<SessionManager>,
    pub connector: Arc<FakeConnector>,
}

impl Fixture {
    pub fn server(&self) -> TestServer {
        TestServer::new(api::app(self.state.clone())).expect("create test server")
    }
}

pub struct FixtureBuilder {
    clients: Vec<Client>,
    connector: FakeConnector,
    keys: Option<KeyManager>,
    enable_registration: bool,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            clients: vec![client("XXX", &client_secret(), &[REDIRECT_URL])],
            connector: FakeConnector::new("fake", "http://fake.example.com"),
            keys: None,
            enable_registration: false,
        }
    }
}

impl FixtureBuilder {
    pub fn clients(mut self, clients: Vec<Client>) -> Self {
        self.clients = clients;
        self
    }

    pub fn connector(mut self, connector: FakeConnector) -> Self {
        self.connector = connector;
        self
    }

    pub fn keys(mut self, keys: KeyManager) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn registration(mut self, enabled: bool) -> Self {
        self.enable_registration = enabled;
        self
    }

    pub fn build(self) -> Fixture {
        let clock = FakeClock::default();
        let sessions = Arc::new(SessionManager::in_memory(
            Arc::new(clock.clone()),
            SessionConfig::default(),
        ));
        let keys = self.keys.unwrap_or_else(|| {
            let signer =
                SigningKey::from_pkcs1_pem("test-key", SIGNING_KEY_PEM).expect("fixture key");
            KeyManager::new(signer, clock_now(&clock) + Duration::days(1), 1)
        });
        let connector = Arc::new(self.connector);
        let registry = ConnectorRegistry::new(vec![connector.clone() as Arc<dyn Connector>])
            .expect("connector registry");
        let clients = MemClientRepo::from_clients(self.clients).expect("valid clients");

        let state = OAuth2State::new(
            ISSUER,
            Arc::new(clients),
            Arc::new(registry),
            sessions.clone(),
            Arc::new(keys),
            Arc::new(clock.clone()),
        )
        .with_registration(self.enable_registration);

        Fixture {
            state,
            clock,
            sessions,
            connector,
        }
    }
}

fn clock_now(clock: &FakeClock) -> time::OffsetDateTime {
    use federated_oidc::clock::Clock;
    clock.now()
}

pub fn fixture() -> Fixture {
    FixtureBuilder::default().build()
}

pub fn basic_auth(user: &str, password: &str) -> (HeaderName, HeaderValue) {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {encoded}")).expect("header value"),
    )
}
