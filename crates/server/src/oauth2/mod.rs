//! OpenID Connect authorization server endpoints.
//!
//! ## Endpoints
//!
//! - `GET /auth` - Authorization endpoint; starts a session and hands the user
//!   agent to the selected connector
//! - `POST /token` - Exchanges a one-time code for an identity token
//! - `GET /keys` - Published verification keys
//! - `GET /.well-known/openid-configuration` - Discovery document
//! - `GET /callback/{connector_id}` - Upstream login callback; redirects to the
//!   client with a one-time code

pub mod authorize;
pub mod discovery;
pub mod id_token;
pub mod keys;
pub mod login;
pub mod redirect;
mod state;
pub mod token;

pub use discovery::ProviderMetadata;
pub use redirect::{LAST_SEEN_COOKIE, TrustedRedirect, should_reprompt};
pub use state::OAuth2State;

use crate::error::OAuthError;
use axum::{
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use utoipa_axum::{router::OpenApiRouter, routes};

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";

pub const PATH_AUTH: &str = "/auth";
pub const PATH_TOKEN: &str = "/token";
pub const PATH_KEYS: &str = "/keys";
pub const PATH_DISCOVERY: &str = "/.well-known/openid-configuration";

/// 405 for anything but `GET`. axum also routes `HEAD` to `GET` handlers,
/// so handlers with side effects call this before touching any state.
pub(crate) fn reject_non_get(method: &Method) -> Option<Response> {
    if method == Method::GET {
        return None;
    }
    let mut response = OAuthError::MethodNotAllowed.into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("GET"));
    Some(response)
}

/// Creates the OAuth2 router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize::authorize))
        .routes(routes!(token::token))
        .routes(routes!(keys::keys))
        .routes(routes!(discovery::openid_configuration))
        .routes(routes!(login::callback))
        .with_state(state)
}
