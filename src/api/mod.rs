pub mod admin;
pub mod drivers;
pub mod rides;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Semaphore;

use crate::error::AppError;

/// Global in-flight request cap. Saturation is answered with 503 instead of
/// queueing.
pub async fn with_capacity(
    State(permits): State<Arc<Semaphore>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let _permit = permits.try_acquire().map_err(|_| AppError::OverCapacity)?;
    Ok(next.run(request).await)
}
