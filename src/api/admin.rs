use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::middleware::{require_role, RoleGuard};
use crate::auth::Role;
use crate::db;
use crate::error::AppError;
use crate::models::driver::DriverStatus;
use crate::models::ride::VehicleType;
use crate::state::AdminState;

pub fn router(state: Arc<AdminState>) -> Router {
    let admin_guard = RoleGuard::new(state.jwt.clone(), Role::Admin);

    let protected = Router::new()
        .route("/admin/overview", get(overview))
        .route("/admin/rides/active", get(active_rides))
        .layer(middleware::from_fn_with_state(admin_guard, require_role));

    Router::new()
        .merge(protected)
        .route("/admin/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            state.http_permits.clone(),
            crate::api::with_capacity,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct OverviewMetrics {
    active_rides: i64,
    total_rides_today: i64,
    total_revenue_today: f64,
    average_wait_time_minutes: f64,
    average_ride_duration_minutes: f64,
    cancellation_rate: f64,
    available_drivers: i64,
    busy_drivers: i64,
}

#[derive(Debug, Serialize)]
struct DriverDistribution {
    economy: i64,
    premium: i64,
    xl: i64,
}

#[derive(Debug, Serialize)]
struct OverviewResponse {
    timestamp: DateTime<Utc>,
    metrics: OverviewMetrics,
    driver_distribution: DriverDistribution,
}

async fn overview(State(state): State<Arc<AdminState>>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let start_of_day = now
        .with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let end_of_day = start_of_day + ChronoDuration::hours(24);

    let mut conn = state.pool.acquire().await?;

    let active_rides = db::admin::count_active_rides(&mut conn).await?;
    let total_rides_today =
        db::admin::count_rides_created_between(&mut conn, start_of_day, end_of_day).await?;
    let total_revenue_today =
        db::admin::sum_revenue_between(&mut conn, start_of_day, end_of_day).await?;
    let average_wait_time_minutes =
        db::admin::avg_wait_minutes_between(&mut conn, start_of_day, end_of_day).await?;
    let average_ride_duration_minutes =
        db::admin::avg_ride_duration_minutes_between(&mut conn, start_of_day, end_of_day).await?;
    let cancellation_rate =
        db::admin::cancellation_rate_between(&mut conn, start_of_day, end_of_day).await?;

    let available_drivers =
        db::admin::count_drivers_by_status(&mut conn, DriverStatus::Available).await?;
    let busy = db::admin::count_drivers_by_status(&mut conn, DriverStatus::Busy).await?;
    let en_route = db::admin::count_drivers_by_status(&mut conn, DriverStatus::EnRoute).await?;

    let economy = db::admin::count_drivers_by_vehicle_type(&mut conn, VehicleType::Economy).await?;
    let premium = db::admin::count_drivers_by_vehicle_type(&mut conn, VehicleType::Premium).await?;
    let xl = db::admin::count_drivers_by_vehicle_type(&mut conn, VehicleType::Xl).await?;

    Ok(Json(OverviewResponse {
        timestamp: now,
        metrics: OverviewMetrics {
            active_rides,
            total_rides_today,
            total_revenue_today,
            average_wait_time_minutes,
            average_ride_duration_minutes,
            cancellation_rate,
            available_drivers,
            busy_drivers: busy + en_route,
        },
        driver_distribution: DriverDistribution { economy, premium, xl },
    }))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ActiveRideItem {
    ride_id: Uuid,
    ride_number: String,
    status: String,
    passenger_id: Uuid,
    driver_id: Option<Uuid>,
    pickup_address: Option<String>,
    destination_address: Option<String>,
    requested_at: DateTime<Utc>,
    current_driver_location: Option<GeoPointResponse>,
}

#[derive(Debug, Serialize)]
struct GeoPointResponse {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
struct ActiveRidesResponse {
    page: i64,
    page_size: i64,
    total_count: i64,
    rides: Vec<ActiveRideItem>,
}

async fn active_rides(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page.filter(|p| *p >= 1).unwrap_or(1);
    let page_size = query.page_size.filter(|s| *s >= 1).unwrap_or(10).min(100);

    let mut conn = state.pool.acquire().await?;
    let total_count = db::admin::count_active_rides(&mut conn).await?;
    let rows =
        db::admin::list_active_rides(&mut conn, (page - 1) * page_size, page_size).await?;

    let rides = rows
        .into_iter()
        .map(|row| ActiveRideItem {
            ride_id: row.ride_id,
            ride_number: row.ride_number,
            status: row.status,
            passenger_id: row.passenger_id,
            driver_id: row.driver_id,
            pickup_address: row.pickup_address,
            destination_address: row.destination_address,
            requested_at: row.requested_at,
            current_driver_location: match (row.driver_latitude, row.driver_longitude) {
                (Some(latitude), Some(longitude)) => {
                    Some(GeoPointResponse { latitude, longitude })
                }
                _ => None,
            },
        })
        .collect();

    Ok(Json(ActiveRidesResponse { page, page_size, total_count, rides }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "admin-service",
    }))
}

async fn metrics(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
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
