use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::api;
use crate::auth::{JwtManager, ACCESS_TOKEN_TTL};
use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::state::AdminState;

/// Wires the admin read service and blocks until shutdown.
pub async fn run() -> Result<(), AppError> {
    let config = Config::load()?;
    let port = config.services.admin_service_port;

    let pool = db::connect(&config).await?;
    let jwt = JwtManager::new(&config.jwt.secret_key, ACCESS_TOKEN_TTL);

    let state = Arc::new(AdminState {
        config,
        pool,
        jwt,
        metrics: Metrics::new(),
        http_permits: Arc::new(Semaphore::new(super::MAX_IN_FLIGHT)),
    });

    info!(port, "admin service starting");
    super::serve(api::admin::router(state), port).await
}
