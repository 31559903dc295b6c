use super::{Connector, ConnectorError, LoginCallback};
use crate::session::RemoteIdentity;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, header};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rustls::{ClientConfig, RootCertStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::time::{Duration, timeout};
use url::Url;

/// Upper bound for the whole code exchange with the upstream token endpoint.
pub const EXCHANGE_TIMEOUT_SECS: u64 = 10;

const USER_AGENT: &str = concat!("federated-oidc/", env!("CARGO_PKG_VERSION"));

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

fn default_scopes() -> Vec<String> {
    vec!["openid".into(), "email".into(), "profile".into()]
}

/// Static configuration of an upstream OpenID Connect provider.
#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamOidcConfig {
    pub id: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub client_id: String,
    pub client_secret: String,
    /// Callback registered with the upstream provider, normally
    /// `<issuer>/callback/<id>`.
    pub redirect_uri: Url,
    /// Expected `iss` of upstream ID tokens; unchecked when absent.
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub trusted_email_provider: bool,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: String,
}

#[derive(Deserialize)]
struct UpstreamClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Sends the user agent to an upstream OpenID Connect provider and exchanges
/// the code it returns for the upstream ID token.
///
/// The session id travels as the upstream `state` so the callback can find the
/// session again.
pub struct UpstreamOidcConnector {
    config: UpstreamOidcConfig,
    endpoint: RwLock<Url>,
    refreshed: watch::Sender<()>,
    http: HttpClient,
}

fn http_client() -> Result<HttpClient, ConnectorError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConnectorError::Setup(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    let https = HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build();
    Ok(Client::builder(TokioExecutor::new()).build(https))
}

impl UpstreamOidcConnector {
    pub fn new(config: UpstreamOidcConfig) -> Result<Self, ConnectorError> {
        let (refreshed, _) = watch::channel(());
        Ok(Self {
            endpoint: RwLock::new(config.authorization_endpoint.clone()),
            config,
            refreshed,
            http: http_client()?,
        })
    }

    /// Points the connector at a new upstream authorization endpoint and
    /// notifies sync watchers.
    pub fn reconfigure(&self, authorization_endpoint: Url) {
        *self.endpoint.write().unwrap_or_else(|e| e.into_inner()) = authorization_endpoint;
        self.refreshed.send_replace(());
        tracing::debug!(connector_id = %self.config.id, "Upstream endpoint updated");
    }

    fn endpoint(&self) -> Url {
        self.endpoint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[tracing::instrument(skip(self, code), fields(connector_id = %self.config.id))]
    async fn exchange(&self, code: &str) -> Result<RemoteIdentity, ConnectorError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", &self.config.client_secret)
            .finish();

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.config.token_endpoint.as_str())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .body(Full::new(Bytes::from(form)))
            .map_err(|e| ConnectorError::Upstream(e.to_string()))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ConnectorError::Upstream(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            tracing::warn!(%status, body = %String::from_utf8_lossy(&body), "Upstream token exchange failed");
            return Err(ConnectorError::Upstream(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| ConnectorError::Upstream(format!("invalid token response: {e}")))?;
        let claims = self.verify_id_token(&token.id_token)?;

        tracing::debug!(sub = %claims.sub, "Upstream login verified");
        Ok(RemoteIdentity {
            id: claims.sub,
            name: claims.name,
            email: claims.email,
        })
    }

    /// Checks audience, expiry and issuer. The token comes straight from the
    /// token endpoint, so its signature is not verified.
    fn verify_id_token(&self, id_token: &str) -> Result<UpstreamClaims, ConnectorError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.set_audience(&[&self.config.client_id]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }

        jsonwebtoken::decode::<UpstreamClaims>(id_token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| ConnectorError::Upstream(format!("invalid upstream id_token: {e}")))
    }
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

#[async_trait]
impl Connector for UpstreamOidcConnector {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn login_url(&self, session_id: &str, reprompt: bool) -> Result<String, ConnectorError> {
        if session_id.is_empty() {
            return Err(ConnectorError::LoginUrl("empty session id".into()));
        }
        let mut url = self.endpoint();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                .append_pair("scope", &self.config.scopes.join(" "))
                .append_pair("state", session_id);
            if reprompt {
                q.append_pair("prompt", "login");
            }
        }
        Ok(url.into())
    }

    async fn handle_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<LoginCallback, ConnectorError> {
        let session_id = non_empty(params, "state")
            .ok_or_else(|| ConnectorError::Callback("missing state".into()))?
            .to_string();

        if let Some(error) = non_empty(params, "error") {
            let reason = match non_empty(params, "error_description") {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            return Err(ConnectorError::Denied { session_id, reason });
        }

        let code = non_empty(params, "code")
            .ok_or_else(|| ConnectorError::Callback("missing code".into()))?;
        let identity = timeout(
            Duration::from_secs(EXCHANGE_TIMEOUT_SECS),
            self.exchange(code),
        )
        .await
        .map_err(|_| ConnectorError::Upstream("timed out contacting token endpoint".into()))??;

        Ok(LoginCallback {
            session_id,
            identity,
        })
    }

    fn healthy(&self) -> Result<(), ConnectorError> {
        for (name, url) in [
            ("authorization", self.endpoint()),
            ("token", self.config.token_endpoint.clone()),
        ] {
            if url.cannot_be_a_base() {
                return Err(ConnectorError::Unhealthy(format!(
                    "{name} endpoint {url} is not usable"
                )));
            }
        }
        Ok(())
    }

    fn trusted_email_provider(&self) -> bool {
        self.config.trusted_email_provider
    }

    fn sync(&self) -> Option<watch::Receiver<()>> {
        Some(self.refreshed.subscribe())
    }
}
