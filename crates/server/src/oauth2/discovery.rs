//! OpenID Connect discovery document.

use crate::error::ErrorResponse;
use crate::key::SIGNING_ALG;
use crate::oauth2::authorize::RESPONSE_TYPE_CODE;
use crate::oauth2::token::GRANT_TYPE_AUTH_CODE;
use crate::oauth2::{
    OAUTH2_TAG, PATH_AUTH, PATH_KEYS, PATH_TOKEN, reject_non_get, state::OAuth2State,
};
use axum::{
    Json,
    extract::State,
    http::{Method, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Provider metadata. Field order is the serialized order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    pub fn new(state: &OAuth2State) -> Self {
        Self {
            issuer: state.issuer.clone(),
            authorization_endpoint: state.endpoint(PATH_AUTH),
            token_endpoint: state.endpoint(PATH_TOKEN),
            jwks_uri: state.endpoint(PATH_KEYS),
            response_types_supported: vec![RESPONSE_TYPE_CODE.to_string()],
            grant_types_supported: vec![GRANT_TYPE_AUTH_CODE.to_string()],
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec![SIGNING_ALG.to_string()],
            token_endpoint_auth_methods_supported: vec!["client_secret_basic".to_string()],
        }
    }
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state, method))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Endpoint URLs and capabilities of this provider. Cacheable for a day.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = ProviderMetadata),
        (status = 405, description = "Method not allowed", body = ErrorResponse),
    )
)]
pub async fn openid_configuration(method: Method, State(state): State<OAuth2State>) -> Response {
    if let Some(rejected) = reject_non_get(&method) {
        return rejected;
    }
    (
        [(header::CACHE_CONTROL, "public, max-age=86400")],
        Json(ProviderMetadata::new(&state)),
    )
        .into_response()
}
