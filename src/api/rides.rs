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
use crate::engine::rides::{self, CreateRideInput};
use crate::error::{AppError, AppJson};
use crate::state::AppState;
use crate::ws;

const SERVICE_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_LIMIT: usize = 1 << 20;

pub fn router(state: Arc<AppState>) -> Router {
    let passenger_guard = RoleGuard::new(state.jwt.clone(), Role::Passenger);

    let protected = Router::new()
        .route("/rides", post(create_ride))
        .route("/rides/:ride_id/cancel", post(cancel_ride))
        .layer(middleware::from_fn_with_state(passenger_guard, require_role));

    Router::new()
        .merge(protected)
        // socket auth happens in-band via the first frame
        .route("/ws/passenger/:passenger_id", get(ws::passenger::passenger_ws))
        .route("/rides/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            state.http_permits.clone(),
            crate::api::with_capacity,
        ))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateRideRequest {
    passenger_id: Option<Uuid>,
    pickup_latitude: f64,
    pickup_longitude: f64,
    #[serde(default)]
    pickup_address: String,
    destination_latitude: f64,
    destination_longitude: f64,
    #[serde(default)]
    destination_address: String,
    ride_type: String,
}

async fn create_ride(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    AppJson(request): AppJson<CreateRideRequest>,
) -> Result<impl IntoResponse, AppError> {
    let passenger_id = match request.passenger_id {
        Some(id) if id != claims.sub => {
            return Err(AppError::Forbidden(
                "passenger_id does not match token subject".to_string(),
            ))
        }
        Some(id) => id,
        None => claims.sub,
    };

    let vehicle_type = request.ride_type.parse().map_err(|_| {
        AppError::Validation("ride_type must be one of: ECONOMY, PREMIUM, XL".to_string())
    })?;

    let input = CreateRideInput {
        passenger_id,
        pickup_latitude: request.pickup_latitude,
        pickup_longitude: request.pickup_longitude,
        pickup_address: request.pickup_address.trim().to_string(),
        destination_latitude: request.destination_latitude,
        destination_longitude: request.destination_longitude,
        destination_address: request.destination_address.trim().to_string(),
        vehicle_type,
    };

    let result = tokio::time::timeout(SERVICE_TIMEOUT, rides::create_ride(&state, input))
        .await
        .map_err(|_| AppError::Internal("create ride timed out".to_string()))??;

    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Deserialize, Default)]
struct CancelRideRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
    body: Option<AppJson<CancelRideRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let reason = body
        .and_then(|AppJson(request)| request.reason)
        .unwrap_or_else(|| "CANCELLED_BY_PASSENGER".to_string());

    let result = tokio::time::timeout(
        SERVICE_TIMEOUT,
        rides::cancel_ride(&state, ride_id, Some(claims.sub), &reason),
    )
    .await
    .map_err(|_| AppError::Internal("cancel ride timed out".to_string()))??;

    Ok(Json(result))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ride-service",
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
