//! Passkey ceremony handlers
//!
//! Begin endpoints return the authenticator options in the body and the
//! ceremony token in the `Session-Key` header. Finish endpoints expect that
//! header back along with the raw authenticator response as the JSON body.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use passkey_core::{CeremonyError, CeremonyStart};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the ceremony session token
pub const SESSION_KEY: HeaderName = HeaderName::from_static("session-key");

/// Request to start a registration or login ceremony
#[derive(Debug, Deserialize, ToSchema)]
pub struct BeginRequest {
    /// Username, 1-64 characters without whitespace
    #[schema(example = "alice")]
    pub username: String,
}

/// Options for `navigator.credentials.create` / `navigator.credentials.get`
#[derive(Debug, Serialize, ToSchema)]
pub struct BeginResponse {
    #[schema(value_type = Object)]
    pub options: Value,
}

/// Successful registration
#[derive(Debug, Serialize, ToSchema)]
pub struct RegistrationResponse {
    #[schema(example = "registered")]
    pub status: &'static str,
    pub user_id: String,
    /// Base64url credential id
    pub credential_id: String,
    /// Number of passkeys the user now holds
    pub credential_count: usize,
}

/// Successful login
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    #[schema(example = "authenticated")]
    pub status: &'static str,
    pub user_id: String,
    /// Base64url credential id
    pub credential_id: String,
    pub sign_count: u32,
    /// Signature counter did not advance, the authenticator may be cloned
    pub clone_warning: bool,
}

fn begin_response(start: CeremonyStart) -> Result<Response, ApiError> {
    let token = HeaderValue::from_str(start.token.as_str())
        .map_err(|_| ApiError::internal("session token is not a valid header value"))?;

    let mut response = Json(BeginResponse {
        options: start.options,
    })
    .into_response();
    response.headers_mut().insert(SESSION_KEY, token);
    Ok(response)
}

fn session_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(SESSION_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Ceremony(CeremonyError::InvalidSession))
}

/// POST /api/passkey/registerStart
///
/// Start enrolling a passkey. Unknown usernames are created on the fly.
#[utoipa::path(
    post,
    path = "/api/passkey/registerStart",
    tag = "Passkey",
    request_body = BeginRequest,
    responses(
        (status = 200, description = "Registration options, token in the Session-Key header", body = BeginResponse),
        (status = 400, description = "Malformed body or invalid username"),
        (status = 500, description = "Failed to start registration")
    )
)]
pub async fn register_start(
    State(state): State<AppState>,
    payload: Result<Json<BeginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let start = state.engine.begin_registration(&req.username).await?;
    begin_response(start)
}

/// POST /api/passkey/registerFinish
///
/// Request body contains the WebAuthn `RegisterPublicKeyCredential` from the browser.
#[utoipa::path(
    post,
    path = "/api/passkey/registerFinish",
    tag = "Passkey",
    params(("Session-Key" = String, Header, description = "Token from registerStart")),
    request_body(content_type = "application/json", description = "Attestation from navigator.credentials.create"),
    responses(
        (status = 200, description = "Passkey registered", body = RegistrationResponse),
        (status = 400, description = "Malformed body, or missing, expired or already used session"),
        (status = 401, description = "Attestation did not verify"),
        (status = 409, description = "Credential already registered")
    )
)]
pub async fn register_finish(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let Json(body) = payload?;
    let token = session_key(&headers)?;
    let outcome = state.engine.finish_registration(token, &body).await?;

    Ok(Json(RegistrationResponse {
        status: "registered",
        user_id: outcome.user_id,
        credential_id: outcome.credential_id.to_base64url(),
        credential_count: outcome.credential_count,
    }))
}

/// POST /api/passkey/loginStart
///
/// Start a login for a user with at least one registered passkey.
#[utoipa::path(
    post,
    path = "/api/passkey/loginStart",
    tag = "Passkey",
    request_body = BeginRequest,
    responses(
        (status = 200, description = "Assertion options, token in the Session-Key header", body = BeginResponse),
        (status = 400, description = "Malformed body or invalid username"),
        (status = 404, description = "Unknown user or no registered passkey")
    )
)]
pub async fn login_start(
    State(state): State<AppState>,
    payload: Result<Json<BeginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let start = state.engine.begin_login(&req.username).await?;
    begin_response(start)
}

/// POST /api/passkey/loginFinish
///
/// Request body contains the WebAuthn `PublicKeyCredential` assertion from the browser.
#[utoipa::path(
    post,
    path = "/api/passkey/loginFinish",
    tag = "Passkey",
    params(("Session-Key" = String, Header, description = "Token from loginStart")),
    request_body(content_type = "application/json", description = "Assertion from navigator.credentials.get"),
    responses(
        (status = 200, description = "Login succeeded", body = LoginResponse),
        (status = 400, description = "Malformed body, or missing, expired or already used session"),
        (status = 401, description = "Assertion did not verify")
    )
)]
pub async fn login_finish(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(body) = payload?;
    let token = session_key(&headers)?;
    let outcome = state.engine.finish_login(token, &body).await?;

    Ok(Json(LoginResponse {
        status: "authenticated",
        user_id: outcome.user_id,
        credential_id: outcome.credential_id.to_base64url(),
        sign_count: outcome.sign_count,
        clone_warning: outcome.clone_warning.is_some(),
    }))
}
