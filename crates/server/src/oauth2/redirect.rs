//! The boundary between direct and redirect-based error reporting.
//!
//! Until a request's redirect target has been checked against the client's
//! registered set, every failure is answered directly. A [`TrustedRedirect`]
//! can only be obtained through [`TrustedRedirect::resolve`], so any code
//! holding one has passed that check.

use crate::client::Client;
use crate::error::OAuthError;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use url::Url;

/// Cookie set by login pages; its presence forces a fresh credential prompt.
pub const LAST_SEEN_COOKIE: &str = "LastSeen";

/// A redirect target that matched one of the client's registered values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedRedirect(Url);

impl TrustedRedirect {
    /// An absent or empty `requested` resolves to the client's only target;
    /// otherwise `requested` must equal a registered target.
    pub fn resolve(client: &Client, requested: Option<&str>) -> Result<Self, OAuthError> {
        let registered = match requested.filter(|r| !r.is_empty()) {
            Some(requested) => client.registered_redirect(requested),
            None => client.sole_redirect(),
        };
        registered
            .cloned()
            .map(Self)
            .ok_or(OAuthError::UntrustedRedirect)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// 302 to the target carrying the one-time `code` and the client's `state`.
    pub fn code_response(&self, code: &str, state: &str) -> Response {
        let mut url = self.0.clone();
        url.query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", state);
        found(url.as_str())
    }

    /// 302 to the target carrying `error` and the client's `state`.
    pub fn error_response(&self, error: &str, state: &str) -> Response {
        let mut url = self.0.clone();
        url.query_pairs_mut()
            .append_pair("error", error)
            .append_pair("state", state);
        found(url.as_str())
    }
}

/// A `302 Found` to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// True when the request carries the [`LAST_SEEN_COOKIE`], whatever its value.
pub fn should_reprompt(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split('=').next())
        .any(|name| name.trim() == LAST_SEEN_COOKIE)
}
