//! Per-service wiring: configuration, store, broker, background consumers,
//! and the HTTP server with graceful shutdown.

pub mod admin;
pub mod driver;
pub mod ride;

use axum::Router;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// In-flight HTTP request cap per service.
pub const MAX_IN_FLIGHT: usize = 256;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

pub async fn serve(app: Router, port: u16) -> Result<(), AppError> {
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
