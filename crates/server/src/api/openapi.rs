//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::oauth2::OAUTH2_TAG;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        let basic = HttpBuilder::new()
            .scheme(HttpAuthScheme::Basic)
            .description(Some(
                "Client id and secret of a registered client, used by the token endpoint.",
            ))
            .build();
        components.add_security_scheme("basicAuth", SecurityScheme::Http(basic));
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Federated OIDC API",
        version = "1.0.0",
        description = "OpenID Connect provider that federates login to upstream identity connectors."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 and OpenID Connect endpoints")
    )
)]
pub struct ApiDoc;
