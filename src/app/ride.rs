use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::api;
use crate::auth::{JwtManager, ACCESS_TOKEN_TTL};
use crate::broker::Broker;
use crate::config::Config;
use crate::db;
use crate::engine;
use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::state::AppState;
use crate::ws::SocketHub;

/// Wires the ride service and blocks until shutdown.
pub async fn run() -> Result<(), AppError> {
    let config = Config::load()?;
    let port = config.services.ride_service_port;

    let pool = db::connect(&config).await?;
    let broker = Broker::connect(&config.amqp_url()).await?;
    let jwt = JwtManager::new(&config.jwt.secret_key, ACCESS_TOKEN_TTL);

    let state = Arc::new(AppState {
        config,
        pool,
        broker,
        jwt,
        hub: SocketHub::new(),
        metrics: Metrics::new(),
        http_permits: Arc::new(Semaphore::new(super::MAX_IN_FLIGHT)),
    });

    // long-lived consumers: driver progress relay, driver-service lifecycle
    // writes, and the location fanout
    tokio::spawn(engine::rides::run_progress_consumer(Arc::clone(&state)));
    tokio::spawn(engine::rides::run_status_consumer(Arc::clone(&state)));
    tokio::spawn(engine::rides::run_location_consumer(Arc::clone(&state)));

    info!(port, "ride service starting");
    super::serve(api::rides::router(state), port).await
}
