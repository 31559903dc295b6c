//! Completion of the federated login.
//!
//! The upstream sends the user agent back to `/callback/{connector_id}`. The
//! connector resolves that callback into a session id and an identity, and
//! this module records both on the session, mints the one-time code and
//! returns the user agent to the client.

use crate::connector::{ConnectorError, LoginCallback};
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::redirect::TrustedRedirect;
use crate::oauth2::{OAUTH2_TAG, reject_non_get, state::OAuth2State};
use crate::session::{RemoteIdentity, Session};
use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    http::Method,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Local user id of a federated identity. Stable for the same connector and
/// remote id, distinct across connectors.
pub fn local_user_id(connector_id: &str, remote_id: &str) -> String {
    let digest = Sha256::new()
        .chain_update(connector_id.as_bytes())
        .chain_update([0u8])
        .chain_update(remote_id.as_bytes())
        .finalize();
    URL_SAFE_NO_PAD.encode(digest)
}

/// Upstream login callback.
#[tracing::instrument(skip(method, state, query))]
#[utoipa::path(
    get,
    path = "/callback/{connector_id}",
    tag = OAUTH2_TAG,
    operation_id = "Connector Callback",
    summary = "Finish a federated login",
    description = "Target of the upstream redirect. The connector resolves the callback into the \
                   session and the asserted identity; the user agent is then redirected to the \
                   client with a one-time `code` and the client's `state`.\n\n\
                   A login refused upstream redirects to the client with `error=access_denied`. \
                   Callbacks that cannot be tied to a session are answered directly.",
    params(("connector_id" = String, Path, description = "Connector that performed the login")),
    responses(
        (status = 302, description = "Redirect to the client with a code, or with an error"),
        (status = 400, description = "Unknown connector, malformed callback or unknown session", body = ErrorResponse),
        (status = 405, description = "Method not allowed", body = ErrorResponse),
    )
)]
pub async fn callback(
    method: Method,
    State(state): State<OAuth2State>,
    Path(connector_id): Path<String>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Response {
    if let Some(rejected) = reject_non_get(&method) {
        return rejected;
    }
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            return OAuthError::MalformedRequest(rejection.body_text()).into_response();
        }
    };
    let Some(connector) = state.connectors.get(&connector_id).cloned() else {
        tracing::warn!(%connector_id, "Callback for unknown connector");
        return OAuthError::UnknownConnector(connector_id).into_response();
    };

    match connector.handle_callback(&params).await {
        Ok(LoginCallback {
            session_id,
            identity,
        }) => complete_login(&state, &connector_id, &session_id, identity).await,
        Err(ConnectorError::Denied { session_id, reason }) => {
            deny_login(&state, &connector_id, &session_id, &reason).await
        }
        Err(err) => {
            tracing::warn!(%connector_id, error = %err, "Rejected login callback");
            OAuthError::LoginFailed(err.to_string()).into_response()
        }
    }
}

/// Attaches `identity` and its local user to the session, mints a code and
/// redirects to the session's client with it.
///
/// Failures before the session's redirect target is re-verified are answered
/// directly; later ones redirect to the client with an error.
pub async fn complete_login(
    state: &OAuth2State,
    connector_id: &str,
    session_id: &str,
    identity: RemoteIdentity,
) -> Response {
    let (session, redirect) = match resume(state, connector_id, session_id).await {
        Ok(resumed) => resumed,
        Err(err) => {
            tracing::warn!(connector_id, error = %err, "Cannot complete login");
            return err.into_response();
        }
    };

    match issue_code(state, &session, identity).await {
        Ok(code) => {
            tracing::info!(session_id, client_id = %session.client_id, connector_id, "Login completed");
            redirect.code_response(&code, &session.client_state)
        }
        Err(err) => {
            tracing::error!(session_id, error = %err, "Failed to issue code");
            redirect.error_response(err.error_code(), &session.client_state)
        }
    }
}

/// Reports a login refused upstream back to the session's client.
pub async fn deny_login(
    state: &OAuth2State,
    connector_id: &str,
    session_id: &str,
    reason: &str,
) -> Response {
    match resume(state, connector_id, session_id).await {
        Ok((session, redirect)) => {
            tracing::info!(session_id, connector_id, reason, "Upstream denied login");
            redirect.error_response("access_denied", &session.client_state)
        }
        Err(err) => {
            tracing::warn!(connector_id, error = %err, "Cannot report denied login");
            err.into_response()
        }
    }
}

/// Loads a live session started for `connector_id` and re-verifies its
/// redirect target against the client's current registration.
async fn resume(
    state: &OAuth2State,
    connector_id: &str,
    session_id: &str,
) -> Result<(Session, TrustedRedirect), OAuthError> {
    let session = state.sessions.get(session_id).await?;
    if session.connector_id != connector_id {
        return Err(OAuthError::SessionNotFound(session_id.to_string()));
    }
    let client = state
        .clients
        .get(&session.client_id)
        .await?
        .ok_or(OAuthError::UnknownClient)?;
    let redirect = TrustedRedirect::resolve(&client, Some(session.redirect_uri.as_str()))?;
    Ok((session, redirect))
}

async fn issue_code(
    state: &OAuth2State,
    session: &Session,
    identity: RemoteIdentity,
) -> Result<String, OAuthError> {
    let user_id = local_user_id(&session.connector_id, &identity.id);
    state
        .sessions
        .attach_remote_identity(&session.id, identity)
        .await?;
    state.sessions.attach_user(&session.id, &user_id).await?;
    Ok(state.sessions.new_session_key(&session.id).await?)
}
