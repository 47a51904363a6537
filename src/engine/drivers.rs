//! Driver & location service operations: online sessions, trip start and
//! completion, and the location write path with its fanout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::contracts::{
    DriverStatusMessage, Envelope, GeoPoint, LocationData, LocationUpdateMessage,
    RideStatusMessage, EXCHANGE_DRIVER_TOPIC, EXCHANGE_LOCATION_FANOUT, EXCHANGE_RIDE_TOPIC,
    ROUTE_DRIVER_STATUS_PREFIX, ROUTE_RIDE_STATUS_PREFIX,
};
use crate::db;
use crate::engine::{generate_correlation_id, pricing};
use crate::error::AppError;
use crate::models::coordinate::{validate_lat_lng, EntityType};
use crate::models::driver::DriverStatus;
use crate::state::AppState;

pub const PRODUCER: &str = "driver-location-service";

/// Writes closer together than this are skipped.
const LOCATION_WRITE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize)]
pub struct GoOnlineResult {
    pub status: String,
    pub session_id: Uuid,
    pub message: String,
}

/// Sets the driver AVAILABLE, opens a session, and records the reported
/// position as current.
pub async fn go_online(
    state: &Arc<AppState>,
    driver_id: Uuid,
    latitude: f64,
    longitude: f64,
) -> Result<GoOnlineResult, AppError> {
    validate_lat_lng(latitude, longitude)?;
    let correlation_id = generate_correlation_id();

    let mut tx = state.pool.begin().await?;
    db::drivers::get(&mut tx, driver_id).await?;
    db::drivers::update_status(&mut tx, driver_id, DriverStatus::Available).await?;
    let session_id = db::sessions::start(&mut tx, driver_id).await?;
    db::coordinates::insert(
        &mut tx,
        driver_id,
        EntityType::Driver,
        &db::coordinates::NewCoordinate {
            address: "N/A".to_string(),
            latitude,
            longitude,
        },
        true,
    )
    .await?;
    tx.commit().await?;

    publish_driver_status(state, driver_id, DriverStatus::Available, None, &correlation_id).await;

    info!(
        driver_id = %driver_id,
        session_id = %session_id,
        correlation_id = %correlation_id,
        "driver online"
    );

    Ok(GoOnlineResult {
        status: DriverStatus::Available.to_string(),
        session_id,
        message: "You are now online and ready to accept rides".to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub duration_hours: f64,
    pub rides_completed: i64,
    pub earnings: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoOfflineResult {
    pub status: String,
    pub session_id: Uuid,
    pub session_summary: SessionSummary,
    pub message: String,
}

/// Marks the driver OFFLINE and closes the open session with a summary.
pub async fn go_offline(state: &Arc<AppState>, driver_id: Uuid) -> Result<GoOfflineResult, AppError> {
    let correlation_id = generate_correlation_id();
    let ended_at = Utc::now();

    let mut tx = state.pool.begin().await?;
    db::drivers::get(&mut tx, driver_id).await?;
    let session = db::sessions::get_active_for_driver(&mut tx, driver_id).await?;
    db::sessions::end(&mut tx, session.id, ended_at).await?;
    db::drivers::update_status(&mut tx, driver_id, DriverStatus::Offline).await?;
    tx.commit().await?;

    publish_driver_status(state, driver_id, DriverStatus::Offline, None, &correlation_id).await;

    info!(
        driver_id = %driver_id,
        session_id = %session.id,
        correlation_id = %correlation_id,
        "driver offline"
    );

    Ok(GoOfflineResult {
        status: DriverStatus::Offline.to_string(),
        session_id: session.id,
        session_summary: SessionSummary {
            duration_hours: (ended_at - session.started_at).num_seconds() as f64 / 3600.0,
            rides_completed: session.total_rides,
            earnings: session.total_earnings,
        },
        message: "You are now offline".to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRideResult {
    pub ride_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub message: String,
}

/// Moves the ride to IN_PROGRESS and the driver to BUSY.
pub async fn start_ride(
    state: &Arc<AppState>,
    driver_id: Uuid,
    ride_id: Uuid,
) -> Result<StartRideResult, AppError> {
    let correlation_id = generate_correlation_id();
    let started_at = Utc::now();

    let mut tx = state.pool.begin().await?;
    db::drivers::get(&mut tx, driver_id).await?;
    let ride = db::rides::get(&mut tx, ride_id).await?;
    if ride.driver_id != Some(driver_id) {
        return Err(AppError::Conflict(format!(
            "ride {ride_id} is not assigned to driver {driver_id}"
        )));
    }

    db::rides::update_status(&mut tx, ride_id, crate::models::ride::RideStatus::InProgress, started_at)
        .await?;
    db::drivers::update_status(&mut tx, driver_id, DriverStatus::Busy).await?;
    tx.commit().await?;

    publish_driver_status(state, driver_id, DriverStatus::Busy, Some(ride_id), &correlation_id)
        .await;
    publish_ride_status(
        state,
        ride_id,
        crate::models::ride::RideStatus::InProgress,
        Some(driver_id),
        None,
        &correlation_id,
    )
    .await;

    info!(
        driver_id = %driver_id,
        ride_id = %ride_id,
        correlation_id = %correlation_id,
        "ride started"
    );

    Ok(StartRideResult {
        ride_id,
        status: DriverStatus::Busy.to_string(),
        started_at,
        message: "Ride started successfully".to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteRideResult {
    pub ride_id: Uuid,
    pub status: String,
    pub completed_at: DateTime<Utc>,
    pub final_fare: f64,
    pub driver_earnings: f64,
    pub message: String,
}

/// Completes the ride with a fare recomputed from driver-reported actuals,
/// returns the driver to AVAILABLE, and settles the counters.
pub async fn complete_ride(
    state: &Arc<AppState>,
    driver_id: Uuid,
    ride_id: Uuid,
    actual_distance_km: f64,
    actual_duration_minutes: u32,
) -> Result<CompleteRideResult, AppError> {
    if actual_distance_km < 0.0 {
        return Err(AppError::Validation("actual_distance_km cannot be negative".to_string()));
    }
    let correlation_id = generate_correlation_id();
    let completed_at = Utc::now();

    let mut tx = state.pool.begin().await?;
    db::drivers::get(&mut tx, driver_id).await?;
    let ride = db::rides::get(&mut tx, ride_id).await?;
    if ride.driver_id != Some(driver_id) {
        return Err(AppError::Conflict(format!(
            "ride {ride_id} is not assigned to driver {driver_id}"
        )));
    }

    let final_fare =
        pricing::compute_fare(ride.vehicle_type, actual_distance_km, actual_duration_minutes);

    db::rides::complete(&mut tx, ride_id, final_fare, completed_at).await?;
    db::drivers::update_status(&mut tx, driver_id, DriverStatus::Available).await?;
    db::drivers::increment_counters_on_complete(&mut tx, driver_id, final_fare).await?;
    let session = db::sessions::get_active_for_driver(&mut tx, driver_id).await?;
    db::sessions::add_completed_ride(&mut tx, session.id, final_fare).await?;
    tx.commit().await?;

    publish_driver_status(
        state,
        driver_id,
        DriverStatus::Available,
        Some(ride_id),
        &correlation_id,
    )
    .await;
    publish_ride_status(
        state,
        ride_id,
        crate::models::ride::RideStatus::Completed,
        Some(driver_id),
        Some(final_fare),
        &correlation_id,
    )
    .await;

    state.hub.stop_tracking(driver_id);

    info!(
        driver_id = %driver_id,
        ride_id = %ride_id,
        final_fare,
        correlation_id = %correlation_id,
        "ride completed"
    );

    Ok(CompleteRideResult {
        ride_id,
        status: DriverStatus::Available.to_string(),
        completed_at,
        final_fare,
        driver_earnings: final_fare,
        message: "Ride completed successfully".to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateLocationResult {
    pub coordinate_id: Uuid,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<Uuid>,
}

/// The location write path shared by the HTTP endpoint and the socket frame:
/// rate limit, `is_current` flip + insert, history append, then fanout.
pub async fn update_location(
    state: &Arc<AppState>,
    driver_id: Uuid,
    location: &LocationData,
) -> Result<UpdateLocationResult, AppError> {
    validate_lat_lng(location.latitude, location.longitude)?;
    let correlation_id = generate_correlation_id();
    let now = Utc::now();

    let mut tx = state.pool.begin().await?;
    db::drivers::get(&mut tx, driver_id).await?;

    let active_ride = db::rides::get_active_for_driver(&mut tx, driver_id).await?;
    let ride_id = active_ride.map(|ride| ride.id);

    let result = match db::coordinates::get_current_for_driver(&mut tx, driver_id).await? {
        Some(current)
            if (now - current.updated_at).to_std().unwrap_or_default()
                < LOCATION_WRITE_INTERVAL =>
        {
            // too soon after the last write; keep the stored point
            UpdateLocationResult {
                coordinate_id: current.id,
                updated_at: current.updated_at,
                ride_id,
            }
        }
        _ => {
            let coordinate = db::coordinates::insert(
                &mut tx,
                driver_id,
                EntityType::Driver,
                &db::coordinates::NewCoordinate {
                    address: location.address.clone().unwrap_or_else(|| "N/A".to_string()),
                    latitude: location.latitude,
                    longitude: location.longitude,
                },
                true,
            )
            .await?;

            db::history::archive(
                &mut tx,
                &db::history::NewLocationSample {
                    coordinate_id: coordinate.id,
                    driver_id,
                    ride_id,
                    latitude: location.latitude,
                    longitude: location.longitude,
                    accuracy_meters: location.accuracy_meters,
                    speed_kmh: location.speed_kmh,
                    heading_degrees: location.heading_degrees,
                    recorded_at: now,
                },
            )
            .await?;

            UpdateLocationResult {
                coordinate_id: coordinate.id,
                updated_at: coordinate.updated_at,
                ride_id,
            }
        }
    };

    tx.commit().await?;
    state.metrics.location_updates_total.inc();

    let message = LocationUpdateMessage {
        driver_id,
        ride_id,
        location: GeoPoint {
            lat: location.latitude,
            lng: location.longitude,
            address: location.address.clone(),
        },
        speed_kmh: location.speed_kmh,
        heading_degrees: location.heading_degrees,
        timestamp: now,
        envelope: Envelope::new(PRODUCER, Some(correlation_id.clone())),
    };

    match serde_json::to_vec(&message) {
        Ok(body) => {
            if let Err(err) = state
                .broker
                .publish(EXCHANGE_LOCATION_FANOUT, "", &body)
                .await
            {
                error!(driver_id = %driver_id, error = %err, "failed to broadcast location update");
            }
        }
        Err(err) => {
            error!(driver_id = %driver_id, error = %err, "failed to encode location update");
        }
    }

    Ok(result)
}

/// Best-effort `ride.status.{status}` publish after a committed lifecycle
/// write. The ride service forwards these to the owning passenger socket.
async fn publish_ride_status(
    state: &Arc<AppState>,
    ride_id: Uuid,
    status: crate::models::ride::RideStatus,
    driver_id: Option<Uuid>,
    final_fare: Option<f64>,
    correlation_id: &str,
) {
    let message = RideStatusMessage {
        ride_id,
        status: status.to_string(),
        timestamp: Utc::now(),
        driver_id,
        final_fare,
        envelope: Envelope::new(PRODUCER, Some(correlation_id.to_string())),
    };

    let body = match serde_json::to_vec(&message) {
        Ok(body) => body,
        Err(err) => {
            error!(ride_id = %ride_id, error = %err, "failed to encode ride status");
            return;
        }
    };

    let routing_key = format!("{ROUTE_RIDE_STATUS_PREFIX}{}", message.status.to_lowercase());
    if let Err(err) = state
        .broker
        .publish(EXCHANGE_RIDE_TOPIC, &routing_key, &body)
        .await
    {
        error!(ride_id = %ride_id, status = %status, error = %err, "failed to publish ride status");
    }
}

/// Best-effort `driver.status.{driver_id}` publish after a committed write.
async fn publish_driver_status(
    state: &Arc<AppState>,
    driver_id: Uuid,
    status: DriverStatus,
    ride_id: Option<Uuid>,
    correlation_id: &str,
) {
    let message = DriverStatusMessage {
        driver_id,
        status: status.to_string(),
        ride_id,
        timestamp: Utc::now(),
        envelope: Envelope::new(PRODUCER, Some(correlation_id.to_string())),
    };

    let body = match serde_json::to_vec(&message) {
        Ok(body) => body,
        Err(err) => {
            error!(driver_id = %driver_id, error = %err, "failed to encode driver status");
            return;
        }
    };

    let routing_key = format!("{ROUTE_DRIVER_STATUS_PREFIX}{driver_id}");
    if let Err(err) = state
        .broker
        .publish(EXCHANGE_DRIVER_TOPIC, &routing_key, &body)
        .await
    {
        error!(
            driver_id = %driver_id,
            status = %status,
            error = %err,
            "failed to publish driver status"
        );
    }
}
