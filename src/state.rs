use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Semaphore;

use crate::auth::JwtManager;
use crate::broker::Broker;
use crate::config::Config;
use crate::observability::metrics::Metrics;
use crate::ws::SocketHub;

/// Shared state of the ride service and the driver & location service. Both
/// talk to the same store and broker and own a socket hub.
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub broker: Arc<Broker>,
    pub jwt: Arc<JwtManager>,
    pub hub: Arc<SocketHub>,
    pub metrics: Metrics,
    pub http_permits: Arc<Semaphore>,
}

/// Read-only state of the admin service.
pub struct AdminState {
    pub config: Config,
    pub pool: PgPool,
    pub jwt: Arc<JwtManager>,
    pub metrics: Metrics,
    pub http_permits: Arc<Semaphore>,
}
