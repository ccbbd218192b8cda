use super::{
    handlers::{auth, health},
    types,
};
use crate::identity::Role;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::me,
    ),
    components(schemas(
        health::Health,
        types::LoginRequest,
        types::RegisterRequest,
        types::RegisterResponse,
        types::AccessTokenResponse,
        types::MeResponse,
        types::ErrorResponse,
        Role,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Service liveness"),
        (name = "auth", description = "Registration, login and session refresh"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// The generated `OpenAPI` document, titled after the package.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
