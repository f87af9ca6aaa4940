//! Passkey Server Library - HTTP binding for passkey registration and login
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod config;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod storage;
pub mod webauthn;

pub use config::Config;
pub use error::ApiError;
pub use handlers::SESSION_KEY;
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config};
pub use state::AppState;
pub use storage::{PostgresCredentialStore, PostgresSessionStore, Stores};
pub use webauthn::{RelyingParty, WebAuthnConfig, WebauthnVerifier};
