use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::middleware::{require_role, RoleGuard};
use crate::auth::{Claims, Role};
use crate::contracts::LocationData;
use crate::engine::drivers as driver_ops;
use crate::error::{AppError, AppJson};
use crate::state::AppState;
use crate::ws;

const SERVICE_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_LIMIT: usize = 1 << 20;

pub fn router(state: Arc<AppState>) -> Router {
    let driver_guard = RoleGuard::new(state.jwt.clone(), Role::Driver);

    let protected = Router::new()
        .route("/drivers/:driver_id/online", post(go_online))
        .route("/drivers/:driver_id/offline", post(go_offline))
        .route("/drivers/:driver_id/location", post(update_location))
        .route("/drivers/:driver_id/start", post(start_ride))
        .route("/drivers/:driver_id/complete", post(complete_ride))
        .layer(middleware::from_fn_with_state(driver_guard, require_role));

    Router::new()
        .merge(protected)
        .route("/ws/driver/:driver_id", get(ws::driver::driver_ws))
        .route("/drivers/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            state.http_permits.clone(),
            crate::api::with_capacity,
        ))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The path id must be the authenticated driver.
fn own_identity(claims: &Claims, driver_id: Uuid) -> Result<(), AppError> {
    if claims.sub != driver_id {
        return Err(AppError::Forbidden(
            "driver_id does not match token subject".to_string(),
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
struct GoOnlineRequest {
    latitude: f64,
    longitude: f64,
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(driver_id): Path<Uuid>,
    AppJson(request): AppJson<GoOnlineRequest>,
) -> Result<impl IntoResponse, AppError> {
    own_identity(&claims, driver_id)?;

    let result = tokio::time::timeout(
        SERVICE_TIMEOUT,
        driver_ops::go_online(&state, driver_id, request.latitude, request.longitude),
    )
    .await
    .map_err(|_| AppError::Internal("go online timed out".to_string()))??;

    Ok(Json(result))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(driver_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    own_identity(&claims, driver_id)?;

    let result = tokio::time::timeout(SERVICE_TIMEOUT, driver_ops::go_offline(&state, driver_id))
        .await
        .map_err(|_| AppError::Internal("go offline timed out".to_string()))??;

    Ok(Json(result))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(driver_id): Path<Uuid>,
    AppJson(location): AppJson<LocationData>,
) -> Result<impl IntoResponse, AppError> {
    own_identity(&claims, driver_id)?;

    let result = tokio::time::timeout(
        SERVICE_TIMEOUT,
        driver_ops::update_location(&state, driver_id, &location),
    )
    .await
    .map_err(|_| AppError::Internal("location update timed out".to_string()))??;

    Ok(Json(result))
}

#[derive(Deserialize)]
struct StartRideRequest {
    ride_id: Uuid,
}

async fn start_ride(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(driver_id): Path<Uuid>,
    AppJson(request): AppJson<StartRideRequest>,
) -> Result<impl IntoResponse, AppError> {
    own_identity(&claims, driver_id)?;

    let result = tokio::time::timeout(
        SERVICE_TIMEOUT,
        driver_ops::start_ride(&state, driver_id, request.ride_id),
    )
    .await
    .map_err(|_| AppError::Internal("start ride timed out".to_string()))??;

    Ok(Json(result))
}

#[derive(Deserialize)]
struct CompleteRideRequest {
    ride_id: Uuid,
    actual_distance_km: f64,
    actual_duration_minutes: u32,
}

async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(driver_id): Path<Uuid>,
    AppJson(request): AppJson<CompleteRideRequest>,
) -> Result<impl IntoResponse, AppError> {
    own_identity(&claims, driver_id)?;

    let result = tokio::time::timeout(
        SERVICE_TIMEOUT,
        driver_ops::complete_ride(
            &state,
            driver_id,
            request.ride_id,
            request.actual_distance_km,
            request.actual_duration_minutes,
        ),
    )
    .await
    .map_err(|_| AppError::Internal("complete ride timed out".to_string()))??;

    Ok(Json(result))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "driver-location-service",
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
