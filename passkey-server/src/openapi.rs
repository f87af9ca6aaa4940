//! OpenAPI documentation configuration
//!
//! Generates OpenAPI 3.0 specification for the passkey ceremony API.

use utoipa::OpenApi;

use crate::handlers::{
    BeginRequest, BeginResponse, HealthResponse, LoginResponse, ReadyResponse,
    RegistrationResponse,
};

/// Passkey ceremony API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Passkey Ceremony API",
        version = "0.1.0",
        description = r#"
## Passwordless authentication with passkeys

Each ceremony takes two requests:

1. `POST .../registerStart` or `.../loginStart` with `{"username": ...}` returns
   authenticator options and a `Session-Key` response header
2. Pass the options to `navigator.credentials.create` / `navigator.credentials.get`
3. `POST .../registerFinish` or `.../loginFinish` with the authenticator response
   as the body and the `Session-Key` header echoed back

A session key is valid for one finish attempt and expires after a few minutes.
Errors are returned as `{"error": message, "code": CODE}`.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Passkey", description = "Passkey registration and login ceremonies"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::passkey::register_start,
        crate::handlers::passkey::register_finish,
        crate::handlers::passkey::login_start,
        crate::handlers::passkey::login_finish,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            BeginRequest,
            BeginResponse,
            RegistrationResponse,
            LoginResponse,
        )
    )
)]
pub struct ApiDoc;
