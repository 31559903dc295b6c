//! Authorization endpoint.

use crate::client::Client;
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::redirect::{TrustedRedirect, found, should_reprompt};
use crate::oauth2::{OAUTH2_TAG, reject_non_get, state::OAuth2State};
use crate::session::NewSession;
use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::IntoParams;

pub const SCOPE_OPENID: &str = "openid";
pub const RESPONSE_TYPE_CODE: &str = "code";

/// Authorization request parameters. Every field is optional at the parsing
/// stage so that each omission is reported by the right validation step.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeRequest {
    /// Must be `code`
    pub response_type: Option<String>,
    /// Client identifier issued during registration
    pub client_id: Option<String>,
    /// Must equal a registered redirect URI; may be omitted when the client has exactly one
    pub redirect_uri: Option<String>,
    /// Connector that performs the federated login
    pub connector_id: Option<String>,
    /// Space-separated scopes; must include `openid`
    pub scope: Option<String>,
    /// Opaque client value returned unchanged
    pub state: Option<String>,
    /// Replay protection value copied into the ID token
    pub nonce: Option<String>,
    /// `1` requests the registration flow when registration is enabled
    pub register: Option<String>,
}

impl AuthorizeRequest {
    fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect()
    }
}

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(method, state, headers, query))]
#[utoipa::path(
    get,
    path = "/auth",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start an authorization code flow",
    description = "Validates the client and its redirect URI, creates a session and redirects the user agent \
                   to the login URL of the selected connector.\n\n\
                   Failures found before the redirect URI is verified are answered directly with 400. \
                   Later failures redirect back to the client with `error` and `state` query parameters.",
    params(AuthorizeRequest),
    responses(
        (status = 302, description = "Redirect to the connector login URL, or back to the client with an error"),
        (status = 400, description = "Unknown client, unregistered redirect URI, missing openid scope or unknown connector", body = ErrorResponse),
        (status = 405, description = "Method not allowed", body = ErrorResponse),
    )
)]
pub async fn authorize(
    method: Method,
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Response {
    if let Some(rejected) = reject_non_get(&method) {
        return rejected;
    }
    let req = match query {
        Ok(Query(req)) => req,
        Err(rejection) => {
            return OAuthError::MalformedRequest(rejection.body_text()).into_response();
        }
    };

    // Nothing past this point may redirect until the target is trusted.
    let (client, redirect) = match verify(&state, &req).await {
        Ok(verified) => verified,
        Err(err) => {
            log_rejection(&err, &req);
            return err.into_response();
        }
    };

    let client_state = req.state.clone().unwrap_or_default();
    match start(&state, &headers, req, &client, &redirect).await {
        Ok(login_url) => found(&login_url),
        Err(err @ OAuthError::UnknownConnector(_)) => {
            tracing::warn!(client_id = %client.id, error = %err, "Rejected authorization request");
            err.into_response()
        }
        Err(err) => {
            if let OAuthError::ServerError(reason) = &err {
                tracing::error!(client_id = %client.id, %reason, "Failed to start session");
            }
            redirect.error_response(err.error_code(), &client_state)
        }
    }
}

/// Resolves the client and its redirect target and checks the scope.
async fn verify(
    state: &OAuth2State,
    req: &AuthorizeRequest,
) -> Result<(Client, TrustedRedirect), OAuthError> {
    let client_id = req
        .client_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(OAuthError::UnknownClient)?;
    let client = state
        .clients
        .get(client_id)
        .await?
        .ok_or(OAuthError::UnknownClient)?;

    let redirect = TrustedRedirect::resolve(&client, req.redirect_uri.as_deref())?;

    if !req.scopes().iter().any(|s| s == SCOPE_OPENID) {
        return Err(OAuthError::MissingScope);
    }
    Ok((client, redirect))
}

/// Runs the trusted part of the flow and returns the connector login URL.
async fn start(
    state: &OAuth2State,
    headers: &HeaderMap,
    req: AuthorizeRequest,
    client: &Client,
    redirect: &TrustedRedirect,
) -> Result<String, OAuthError> {
    if req.response_type.as_deref() != Some(RESPONSE_TYPE_CODE) {
        return Err(OAuthError::UnsupportedResponseType);
    }

    let connector_id = req.connector_id.clone().unwrap_or_default();
    let connector = state
        .connectors
        .get(&connector_id)
        .cloned()
        .ok_or_else(|| OAuthError::UnknownConnector(connector_id.clone()))?;

    let register = state.enable_registration && req.register.as_deref() == Some("1");
    let scopes = req.scopes();
    let session_id = state
        .sessions
        .new_session(NewSession {
            connector_id,
            client_id: client.id.clone(),
            client_state: req.state.unwrap_or_default(),
            redirect_uri: redirect.url().clone(),
            nonce: req.nonce,
            register,
            scopes,
        })
        .await?;

    let reprompt = should_reprompt(headers);
    let login_url = connector
        .login_url(&session_id, reprompt)
        .map_err(|e| OAuthError::ServerError(e.to_string()))?;

    tracing::info!(client_id = %client.id, connector_id = %connector.id(), reprompt, "Started authorization session");
    Ok(login_url)
}

fn log_rejection(err: &OAuthError, req: &AuthorizeRequest) {
    let client_id = req.client_id.as_deref().unwrap_or_default();
    match err {
        OAuthError::ServerError(reason) => {
            tracing::error!(client_id, %reason, "Client lookup failed");
        }
        OAuthError::UntrustedRedirect => tracing::warn!(
            client_id,
            redirect_uri = req.redirect_uri.as_deref().unwrap_or_default(),
            "Rejected unregistered redirect_uri"
        ),
        other => tracing::warn!(client_id, error = %other, "Rejected authorization request"),
    }
}
