//! HTTP surface of the server.
//!
//! - `oauth2` endpoints (/auth, /token, /keys, discovery)
//! - `health` - Health check endpoint (/health)
//! - `openapi` - OpenAPI/Utoipa configuration, served at /api-docs

pub mod health;
pub mod openapi;

pub use health::MISC_TAG;

use crate::error::OAuthError;
use crate::oauth2::{self, OAuth2State};
use axum::{
    Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_redoc::{Redoc, Servable};

/// Builds the complete application router.
pub fn app(state: OAuth2State) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(oauth2::router(state.clone()))
        .merge(health::router(state))
        .split_for_parts();

    router
        .merge(Redoc::with_url("/api-docs", api))
        .layer(middleware::map_response(json_method_not_allowed))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Replaces axum's empty 405 body with the OAuth2 JSON error, keeping `Allow`.
async fn json_method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }
    let allow = response.headers().get(header::ALLOW).cloned();
    let mut json = OAuthError::MethodNotAllowed.into_response();
    if let Some(allow) = allow {
        json.headers_mut().insert(header::ALLOW, allow);
    }
    json
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(state: OAuth2State, addr: SocketAddr) -> color_eyre::Result<()> {
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
