//! PostgreSQL store. Plain-SQL repositories over `sqlx`.
//!
//! Every function here takes a `&mut PgConnection`: the caller owns the
//! transaction (`pool.begin()` … `commit()`), threads the connection through
//! the calls it wants to be atomic, and lets the drop-on-error path roll
//! back. No repository function acquires its own connection.

pub mod admin;
pub mod coordinates;
pub mod drivers;
pub mod events;
pub mod history;
pub mod rides;
pub mod sessions;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;

pub async fn connect(cfg: &Config) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&cfg.database_url())
        .await?;
    Ok(pool)
}
