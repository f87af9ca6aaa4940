//! Passkey Server - REST API for passkey registration and login
//!
//! Exposes the passkey-core ceremony engine via HTTP endpoints:
//! - POST /api/passkey/registerStart, /api/passkey/registerFinish
//! - POST /api/passkey/loginStart, /api/passkey/loginFinish

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use passkey_server::{
    create_router_with_config, AppState, Config, Stores, WebAuthnConfig, WebauthnVerifier,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "passkey_server=info,passkey_core=info,tower_http=info";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    let webauthn = WebAuthnConfig::from_env()?;
    tracing::info!(rp_id = webauthn.rp_id(), "WebAuthn relying party configured");

    let stores = Stores::from_env(&config).await?;
    let state = AppState::new(stores, Arc::new(WebauthnVerifier::new(webauthn)), &config);
    let sweeper = state.spawn_session_sweeper(config.session_sweep_interval());

    let app = create_router_with_config(state, &config);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    tracing::info!("Gracefully shutdown");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
