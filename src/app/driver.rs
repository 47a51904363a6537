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

/// Wires the driver & location service and blocks until shutdown.
pub async fn run() -> Result<(), AppError> {
    let config = Config::load()?;
    let port = config.services.driver_location_service_port;

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

    // candidate search + offer fan-out for incoming match requests
    tokio::spawn(engine::matching::run_matching_consumer(Arc::clone(&state)));

    info!(port, "driver & location service starting");
    super::serve(api::drivers::router(state), port).await
}
