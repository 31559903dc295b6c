use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crate::session::SessionError;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Failure of a storage collaborator (client registry, session tables).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Record already exists: {0}")]
    Conflict(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Request-level failures of the authorization and token endpoints.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Unknown or missing client_id")]
    UnknownClient,
    #[error("redirect_uri is not registered for this client")]
    UntrustedRedirect,
    #[error("scope must include 'openid'")]
    MissingScope,
    #[error("Only the 'code' response type is supported")]
    UnsupportedResponseType,
    #[error("Unknown connector: {0}")]
    UnknownConnector(String),
    #[error("Unsupported grant_type: {0}")]
    InvalidGrantType(String),
    #[error("code is required")]
    MissingCode,
    #[error("Client authentication failed")]
    ClientAuthFailed,
    #[error("Invalid, expired or already used code")]
    InvalidCode,
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Login was not completed: {0}")]
    LoginFailed(String),
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Internal server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// Machine-readable OAuth2 error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::MethodNotAllowed => "method_not_allowed",
            OAuthError::UnknownClient | OAuthError::ClientAuthFailed => "invalid_client",
            OAuthError::UntrustedRedirect
            | OAuthError::UnknownConnector(_)
            | OAuthError::MissingCode
            | OAuthError::MalformedRequest(_) => "invalid_request",
            OAuthError::MissingScope => "invalid_scope",
            OAuthError::UnsupportedResponseType => "unsupported_response_type",
            OAuthError::InvalidGrantType(_) => "unsupported_grant_type",
            OAuthError::InvalidCode | OAuthError::SessionNotFound(_) => "invalid_grant",
            OAuthError::LoginFailed(_) => "access_denied",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            OAuthError::ClientAuthFailed => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// JSON body for direct (non-redirect) error responses.
    pub fn body(&self, state: Option<&str>) -> ErrorResponse {
        let description = match self {
            // Internal details stay in the logs.
            OAuthError::ServerError(_) => None,
            other => Some(other.to_string()),
        };
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: description,
            state: state.filter(|s| !s.is_empty()).map(String::from),
        }
    }
}

impl From<StorageError> for OAuthError {
    fn from(e: StorageError) -> Self {
        OAuthError::ServerError(e.to_string())
    }
}

impl From<SessionError> for OAuthError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidCode => OAuthError::InvalidCode,
            SessionError::NotFound(id) => OAuthError::SessionNotFound(id),
            SessionError::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body(None))).into_response()
    }
}

/// Error body shared by all direct error responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_trust_failures_are_bad_requests() {
        for err in [
            OAuthError::UnknownClient,
            OAuthError::UntrustedRedirect,
            OAuthError::MissingScope,
            OAuthError::UnknownConnector("nope".into()),
        ] {
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{err}");
        }
    }

    #[test]
    fn client_auth_failure_is_unauthorized() {
        assert_eq!(
            OAuthError::ClientAuthFailed.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(OAuthError::ClientAuthFailed.error_code(), "invalid_client");
    }

    #[test]
    fn server_error_hides_details() {
        let body = OAuthError::ServerError("db exploded".into()).body(None);
        assert_eq!(body.error, "server_error");
        assert!(body.error_description.is_none());
    }

    #[test]
    fn body_echoes_non_empty_state() {
        let body = OAuthError::InvalidGrantType("x".into()).body(Some("abc"));
        assert_eq!(body.state.as_deref(), Some("abc"));
        let body = OAuthError::InvalidGrantType("x".into()).body(Some(""));
        assert!(body.state.is_none());
    }

    #[test]
    fn storage_errors_become_server_errors() {
        let err: OAuthError = StorageError::Conflict("abc".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn session_errors_map_to_grant_errors() {
        let err: OAuthError = SessionError::InvalidCode.into();
        assert_eq!(err.error_code(), "invalid_grant");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: OAuthError = SessionError::Storage(StorageError::NotFound("x".into())).into();
        assert_eq!(err.error_code(), "server_error");
    }
}
