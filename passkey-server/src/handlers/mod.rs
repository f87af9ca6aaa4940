//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod health;
pub mod passkey;

pub use crate::state::AppState;
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use passkey::{
    login_finish, login_start, register_finish, register_start, BeginRequest, BeginResponse,
    LoginResponse, RegistrationResponse, SESSION_KEY,
};
