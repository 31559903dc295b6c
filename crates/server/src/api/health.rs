//! Health check endpoint.

use crate::oauth2::OAuth2State;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    /// `ok` or `unhealthy`
    pub status: String,
    /// Failing connectors and their errors
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connectors: BTreeMap<String, String>,
}

pub(crate) fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(health))
        .with_state(state)
}

/// Health check endpoint.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    method(get, head),
    path = "/health",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service and connector health",
    description = "Reports `ok` when every configured connector is healthy. Otherwise answers 500 \
                   and lists the failing connectors.",
    responses(
        (status = 200, description = "All connectors healthy", body = HealthReport),
        (status = 500, description = "At least one connector is unhealthy", body = HealthReport)
    )
)]
pub async fn health(State(state): State<OAuth2State>) -> Response {
    let connectors: BTreeMap<String, String> = state
        .connectors
        .health()
        .into_iter()
        .filter_map(|(id, result)| result.err().map(|e| (id, e.to_string())))
        .collect();

    if connectors.is_empty() {
        return (
            StatusCode::OK,
            Json(HealthReport {
                status: "ok".to_string(),
                connectors,
            }),
        )
            .into_response();
    }

    tracing::warn!(failing = ?connectors.keys().collect::<Vec<_>>(), "Unhealthy connectors");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(HealthReport {
            status: "unhealthy".to_string(),
            connectors,
        }),
    )
        .into_response()
}
