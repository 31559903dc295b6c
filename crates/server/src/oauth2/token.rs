//! Token endpoint.

use crate::client::ClientCredentials;
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::id_token::IdTokenClaims;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const GRANT_TYPE_AUTH_CODE: &str = "authorization_code";

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// Must be `authorization_code`
    pub grant_type: Option<String>,
    /// One-time code from the authorization redirect
    pub code: Option<String>,
    /// Echoed in error responses
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code for an ID token",
    description = "Redeems a one-time code. The client authenticates with HTTP Basic credentials.\n\n\
                   Each code can be redeemed once; every later attempt fails with `invalid_grant`. \
                   Error bodies echo the request's `state` when present.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Unsupported grant type, missing or invalid code", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 405, description = "Method not allowed", body = ErrorResponse),
    ),
    security(("basicAuth" = []))
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let params = match form {
        Ok(Form(params)) => params,
        Err(rejection) => {
            return error_response(
                &state,
                OAuthError::MalformedRequest(rejection.body_text()),
                None,
            );
        }
    };

    let client_state = params.state.clone();
    match exchange(&state, &headers, params).await {
        Ok(response) => (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(response),
        )
            .into_response(),
        Err(err) => error_response(&state, err, client_state.as_deref()),
    }
}

async fn exchange(
    state: &OAuth2State,
    headers: &HeaderMap,
    params: TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let grant_type = params.grant_type.unwrap_or_default();
    if grant_type != GRANT_TYPE_AUTH_CODE {
        return Err(OAuthError::InvalidGrantType(grant_type));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(OAuthError::MissingCode)?;

    let creds = basic_credentials(headers).ok_or(OAuthError::ClientAuthFailed)?;
    let client = state
        .clients
        .authenticate(&creds)
        .await?
        .ok_or(OAuthError::ClientAuthFailed)?;

    let session = state.sessions.redeem(&code).await?;
    if session.client_id != client.id {
        tracing::warn!(
            client_id = %client.id,
            session_client_id = %session.client_id,
            "Code presented by a different client"
        );
        return Err(OAuthError::InvalidCode);
    }
    let Some(user_id) = session.user_id.as_deref() else {
        tracing::warn!(session_id = %session.id, "Redeemed session has no user attached");
        return Err(OAuthError::InvalidCode);
    };

    let trusted_email = state
        .connectors
        .get(&session.connector_id)
        .is_some_and(|c| c.trusted_email_provider());
    let claims = IdTokenClaims::for_session(
        &state.issuer,
        &session,
        user_id,
        trusted_email,
        state.clock.now(),
        state.id_token_ttl,
    );

    let signer = state
        .keys
        .signer()
        .map_err(|e| OAuthError::ServerError(e.to_string()))?;
    let id_token = signer
        .sign(&claims)
        .map_err(|e| OAuthError::ServerError(e.to_string()))?;

    tracing::info!(client_id = %client.id, sub = %claims.sub, kid = %signer.id(), "Issued ID token");
    Ok(TokenResponse {
        access_token: id_token.clone(),
        id_token,
        token_type: "bearer".to_string(),
        expires_in: state.id_token_ttl.whole_seconds(),
    })
}

/// JSON error body echoing `state`; 401s also carry a Basic challenge.
fn error_response(state: &OAuth2State, err: OAuthError, client_state: Option<&str>) -> Response {
    match &err {
        OAuthError::ServerError(reason) => tracing::error!(%reason, "Token request failed"),
        OAuthError::ClientAuthFailed | OAuthError::InvalidCode => {
            tracing::warn!(error = %err, "Rejected token request")
        }
        _ => tracing::debug!(error = %err, "Rejected token request"),
    }

    let mut response = (err.status(), Json(err.body(client_state))).into_response();
    if err.status() == StatusCode::UNAUTHORIZED
        && let Ok(challenge) =
            HeaderValue::from_str(&format!("Basic realm=\"{}\"", state.issuer))
    {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, challenge);
    }
    response
}

/// Client id and secret from an `Authorization: Basic` header.
fn basic_credentials(headers: &HeaderMap) -> Option<ClientCredentials> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some(ClientCredentials {
        id: id.to_string(),
        secret: secret.to_string(),
    })
}
