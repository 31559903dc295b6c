//! Verification key publication.

use crate::error::ErrorResponse;
use crate::key::JwkSet;
use crate::oauth2::{OAUTH2_TAG, reject_non_get, state::OAuth2State};
use axum::{
    Json,
    extract::State,
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

/// IMF-fixdate, e.g. `Mon, 01 Jan 2024 00:00:13 GMT`.
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Formats `at` as an HTTP date.
pub fn http_date(at: OffsetDateTime) -> Option<String> {
    at.to_offset(time::UtcOffset::UTC).format(HTTP_DATE).ok()
}

/// Whole seconds from `now` until `expires_at`, never negative.
pub fn max_age(expires_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (expires_at - now).whole_seconds().max(0)
}

/// Published key set.
#[tracing::instrument(skip(state, method))]
#[utoipa::path(
    get,
    path = "/keys",
    tag = OAUTH2_TAG,
    operation_id = "JSON Web Key Set",
    summary = "Keys for verifying issued ID tokens",
    description = "Returns the public keys of the active key set. `Cache-Control` and `Expires` \
                   follow the expiry of the set so clients refetch after a rotation.",
    responses(
        (status = 200, description = "Active key set", body = JwkSet, content_type = "application/json"),
        (status = 405, description = "Method not allowed", body = ErrorResponse),
    )
)]
pub async fn keys(method: Method, State(state): State<OAuth2State>) -> Response {
    if let Some(rejected) = reject_non_get(&method) {
        return rejected;
    }
    let snapshot = state.keys.snapshot();
    let now = state.clock.now();

    let mut response = Json(snapshot.to_jwk_set()).into_response();
    let headers = response.headers_mut();
    if let Ok(cache) = HeaderValue::from_str(&format!(
        "public, max-age={}",
        max_age(snapshot.expires_at, now)
    )) {
        headers.insert(header::CACHE_CONTROL, cache);
    }
    if let Some(expires) =
        http_date(snapshot.expires_at).and_then(|d| HeaderValue::from_str(&d).ok())
    {
        headers.insert(header::EXPIRES, expires);
    }
    response
}
