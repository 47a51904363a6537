//! Ride service operations: creation, cancellation, progress relay, and the
//! location fanout subscription that feeds passenger sockets.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::contracts::{
    Envelope, GeoPoint, LocationUpdateMessage, PassengerPush, RideMatchRequest, RideStatusMessage,
    EXCHANGE_RIDE_TOPIC, QUEUE_DRIVER_STATUS, QUEUE_LOCATION_UPDATES_RIDE, QUEUE_RIDE_STATUS,
    ROUTE_RIDE_REQUEST_PREFIX, ROUTE_RIDE_STATUS_PREFIX,
};
use crate::db;
use crate::engine::{generate_correlation_id, pricing, supervisor};
use crate::error::AppError;
use crate::geo;
use crate::models::coordinate::{validate_lat_lng, EntityType};
use crate::models::ride::{generate_ride_number, Ride, RideStatus, VehicleType};
use crate::state::AppState;

pub const PRODUCER: &str = "ride-service";
pub const MATCH_RADIUS_KM: f64 = 5.0;
pub const OFFER_TIMEOUT_SECONDS: u32 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRideInput {
    pub passenger_id: Uuid,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: String,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub destination_address: String,
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRideResult {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub status: String,
    pub estimated_fare: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: u32,
}

/// Creates a ride in REQUESTED, publishes the match request, and starts the
/// per-ride supervisor.
pub async fn create_ride(
    state: &Arc<AppState>,
    input: CreateRideInput,
) -> Result<CreateRideResult, AppError> {
    validate_lat_lng(input.pickup_latitude, input.pickup_longitude)?;
    validate_lat_lng(input.destination_latitude, input.destination_longitude)?;

    let correlation_id = generate_correlation_id();
    let ride_number = generate_ride_number(Utc::now());

    let distance_km = geo::haversine_km(
        input.pickup_latitude,
        input.pickup_longitude,
        input.destination_latitude,
        input.destination_longitude,
    );
    let duration_minutes = pricing::estimate_duration_minutes(distance_km);
    let estimated_fare = pricing::compute_fare(input.vehicle_type, distance_km, duration_minutes);
    let priority = pricing::compute_priority(input.vehicle_type, distance_km);

    let mut tx = state.pool.begin().await?;

    let pickup = db::coordinates::insert(
        &mut tx,
        input.passenger_id,
        EntityType::Passenger,
        &db::coordinates::NewCoordinate {
            address: input.pickup_address.clone(),
            latitude: input.pickup_latitude,
            longitude: input.pickup_longitude,
        },
        true,
    )
    .await?;

    let destination = db::coordinates::insert(
        &mut tx,
        input.passenger_id,
        EntityType::Passenger,
        &db::coordinates::NewCoordinate {
            address: input.destination_address.clone(),
            latitude: input.destination_latitude,
            longitude: input.destination_longitude,
        },
        false,
    )
    .await?;

    let ride = db::rides::create(
        &mut tx,
        &db::rides::NewRide {
            ride_number: ride_number.clone(),
            passenger_id: input.passenger_id,
            vehicle_type: input.vehicle_type,
            priority,
            estimated_fare,
            pickup_coordinate_id: pickup.id,
            destination_coordinate_id: destination.id,
        },
    )
    .await?;

    tx.commit().await?;

    let request = RideMatchRequest {
        ride_id: ride.id,
        ride_number: ride_number.clone(),
        pickup_location: GeoPoint {
            lat: input.pickup_latitude,
            lng: input.pickup_longitude,
            address: Some(input.pickup_address),
        },
        destination_location: GeoPoint {
            lat: input.destination_latitude,
            lng: input.destination_longitude,
            address: Some(input.destination_address),
        },
        ride_type: input.vehicle_type.to_string(),
        estimated_fare,
        max_distance_km: MATCH_RADIUS_KM,
        timeout_seconds: OFFER_TIMEOUT_SECONDS,
        envelope: Envelope::new(PRODUCER, Some(correlation_id.clone())),
    };

    // the database is authoritative; publish failures are logged, not fatal
    if let Err(err) = publish_ride_request(state, input.vehicle_type, &request).await {
        error!(ride_id = %ride.id, error = %err, "failed to publish ride request");
    }

    supervisor::spawn(Arc::clone(state), ride.id, correlation_id.clone());

    if let Err(err) = publish_ride_status(
        state,
        &RideStatusMessage {
            ride_id: ride.id,
            status: RideStatus::Requested.to_string(),
            timestamp: Utc::now(),
            driver_id: None,
            final_fare: None,
            envelope: Envelope::new(PRODUCER, Some(correlation_id.clone())),
        },
    )
    .await
    {
        error!(ride_id = %ride.id, error = %err, "failed to publish initial ride status");
    }

    info!(
        ride_id = %ride.id,
        ride_number = %ride_number,
        passenger_id = %input.passenger_id,
        correlation_id = %correlation_id,
        "ride created"
    );

    Ok(CreateRideResult {
        ride_id: ride.id,
        ride_number,
        status: ride.status.to_string(),
        estimated_fare,
        estimated_distance_km: distance_km,
        estimated_duration_minutes: duration_minutes,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelRideResult {
    pub ride_id: Uuid,
    pub status: String,
    pub cancelled_at: DateTime<Utc>,
    pub message: String,
}

/// Cancels a ride on behalf of its passenger.
pub async fn cancel_ride(
    state: &Arc<AppState>,
    ride_id: Uuid,
    requested_by: Option<Uuid>,
    reason: &str,
) -> Result<CancelRideResult, AppError> {
    let correlation_id = generate_correlation_id();
    let cancelled_at = Utc::now();

    let mut tx = state.pool.begin().await?;
    let ride = db::rides::get(&mut tx, ride_id).await?;

    if let Some(passenger_id) = requested_by {
        if ride.passenger_id != passenger_id {
            return Err(AppError::Forbidden(
                "ride does not belong to this passenger".to_string(),
            ));
        }
    }

    db::rides::cancel(&mut tx, ride_id, reason, cancelled_at).await?;
    tx.commit().await?;

    if let Err(err) = publish_ride_status(
        state,
        &RideStatusMessage {
            ride_id,
            status: RideStatus::Cancelled.to_string(),
            timestamp: cancelled_at,
            driver_id: ride.driver_id,
            final_fare: None,
            envelope: Envelope::new(PRODUCER, Some(correlation_id.clone())),
        },
    )
    .await
    {
        error!(ride_id = %ride_id, error = %err, "failed to publish cancelled status");
    }

    state
        .hub
        .notify_passenger(
            ride.passenger_id,
            &PassengerPush::RideStatusUpdate {
                ride_id,
                ride_number: Some(ride.ride_number.clone()),
                status: RideStatus::Cancelled.to_string(),
                driver_info: None,
                envelope: Envelope::new(PRODUCER, Some(correlation_id.clone())),
            },
        )
        .await;

    info!(ride_id = %ride_id, reason, correlation_id = %correlation_id, "ride cancelled");

    Ok(CancelRideResult {
        ride_id,
        status: RideStatus::Cancelled.to_string(),
        cancelled_at,
        message: "Ride cancelled successfully".to_string(),
    })
}

/// Applies a relayed progress transition (idempotently skipping anything the
/// lifecycle graph forbids), publishes the status, and notifies the
/// passenger.
pub async fn set_ride_progress(
    state: &Arc<AppState>,
    ride_id: Uuid,
    next: RideStatus,
    correlation_id: Option<String>,
) -> Result<(), AppError> {
    let now = Utc::now();

    let mut tx = state.pool.begin().await?;
    let ride = db::rides::get(&mut tx, ride_id).await?;

    if ride.status == next || !ride.status.can_transition_to(next) {
        return Ok(());
    }

    db::rides::update_status(&mut tx, ride_id, next, now).await?;
    tx.commit().await?;

    notify_status_change(state, &ride, next, correlation_id).await;
    Ok(())
}

/// Publishes `ride.status.{status}` and pushes the update to the passenger
/// socket (best-effort).
pub async fn notify_status_change(
    state: &Arc<AppState>,
    ride: &Ride,
    status: RideStatus,
    correlation_id: Option<String>,
) {
    if let Err(err) = publish_ride_status(
        state,
        &RideStatusMessage {
            ride_id: ride.id,
            status: status.to_string(),
            timestamp: Utc::now(),
            driver_id: ride.driver_id,
            final_fare: ride.final_fare,
            envelope: Envelope::new(PRODUCER, correlation_id.clone()),
        },
    )
    .await
    {
        error!(ride_id = %ride.id, error = %err, "failed to publish ride status");
    }

    state
        .hub
        .notify_passenger(
            ride.passenger_id,
            &PassengerPush::RideStatusUpdate {
                ride_id: ride.id,
                ride_number: Some(ride.ride_number.clone()),
                status: status.to_string(),
                driver_info: None,
                envelope: Envelope::new(PRODUCER, correlation_id),
            },
        )
        .await;
}

pub async fn publish_ride_request(
    state: &Arc<AppState>,
    vehicle_type: VehicleType,
    request: &RideMatchRequest,
) -> Result<(), AppError> {
    let routing_key = format!(
        "{ROUTE_RIDE_REQUEST_PREFIX}{}",
        vehicle_type.as_str().to_lowercase()
    );
    let body = serde_json::to_vec(request)
        .map_err(|err| AppError::Internal(format!("encode match request: {err}")))?;
    state
        .broker
        .publish(EXCHANGE_RIDE_TOPIC, &routing_key, &body)
        .await?;
    info!(routing_key = %routing_key, "ride request published");
    Ok(())
}

pub async fn publish_ride_status(
    state: &Arc<AppState>,
    message: &RideStatusMessage,
) -> Result<(), AppError> {
    let routing_key = format!(
        "{ROUTE_RIDE_STATUS_PREFIX}{}",
        message.status.to_lowercase()
    );
    let body = serde_json::to_vec(message)
        .map_err(|err| AppError::Internal(format!("encode ride status: {err}")))?;
    state
        .broker
        .publish(EXCHANGE_RIDE_TOPIC, &routing_key, &body)
        .await
}

/// Consumes `driver_status` and maps driver-reported progress onto ride
/// transitions.
pub async fn run_progress_consumer(state: Arc<AppState>) {
    let broker = Arc::clone(&state.broker);
    broker
        .run_consumer(QUEUE_DRIVER_STATUS, "ride-progress", 20, move |payload| {
            let state = Arc::clone(&state);
            async move {
                let message: crate::contracts::DriverStatusMessage =
                    serde_json::from_slice(&payload.data).map_err(|err| {
                        AppError::Validation(format!("bad driver status message: {err}"))
                    })?;

                let Some(ride_id) = message.ride_id else {
                    return Ok(());
                };

                let next = match message.status.as_str() {
                    "ARRIVED" => RideStatus::Arrived,
                    "IN_PROGRESS" => RideStatus::InProgress,
                    "COMPLETED" => RideStatus::Completed,
                    // plain driver statuses carry no ride progress
                    _ => return Ok(()),
                };

                set_ride_progress(&state, ride_id, next, message.envelope.correlation_id).await
            }
        })
        .await;
}

/// Consumes `ride_status` and relays the lifecycle writes performed by the
/// driver & location service (IN_PROGRESS, COMPLETED) to the owning
/// passenger's socket. Statuses this service writes itself are pushed
/// directly at write time and skipped here.
pub async fn run_status_consumer(state: Arc<AppState>) {
    let broker = Arc::clone(&state.broker);
    broker
        .run_consumer(QUEUE_RIDE_STATUS, "ride-status-fanout", 20, move |payload| {
            let state = Arc::clone(&state);
            async move {
                let message: RideStatusMessage =
                    serde_json::from_slice(&payload.data).map_err(|err| {
                        AppError::Validation(format!("bad ride status message: {err}"))
                    })?;

                let status: RideStatus = match message.status.parse() {
                    Ok(status) => status,
                    Err(_) => return Ok(()),
                };
                if !matches!(status, RideStatus::InProgress | RideStatus::Completed) {
                    return Ok(());
                }

                let ride = {
                    let mut conn = state.pool.acquire().await?;
                    db::rides::get(&mut conn, message.ride_id).await?
                };

                state
                    .hub
                    .notify_passenger(
                        ride.passenger_id,
                        &PassengerPush::RideStatusUpdate {
                            ride_id: ride.id,
                            ride_number: Some(ride.ride_number.clone()),
                            status: status.to_string(),
                            driver_info: None,
                            envelope: Envelope::new(PRODUCER, message.envelope.correlation_id),
                        },
                    )
                    .await;

                Ok(())
            }
        })
        .await;
}

/// Consumes the location fanout and forwards points to the passenger owning
/// the driver's active ride.
pub async fn run_location_consumer(state: Arc<AppState>) {
    let broker = Arc::clone(&state.broker);
    broker
        .run_consumer(
            QUEUE_LOCATION_UPDATES_RIDE,
            "ride-service-locations",
            50,
            move |payload| {
                let state = Arc::clone(&state);
                async move {
                    let message: LocationUpdateMessage = serde_json::from_slice(&payload.data)
                        .map_err(|err| {
                            AppError::Validation(format!("bad location update: {err}"))
                        })?;
                    forward_location(&state, message).await
                }
            },
        )
        .await;
}

async fn forward_location(
    state: &Arc<AppState>,
    message: LocationUpdateMessage,
) -> Result<(), AppError> {
    let mut conn = state.pool.acquire().await?;

    // prefer the ride id in the message; fall back to the driver's active ride
    let ride = match message.ride_id {
        Some(ride_id) => match db::rides::get(&mut conn, ride_id).await {
            Ok(ride) => Some(ride),
            Err(AppError::NotFound(_)) => {
                db::rides::get_active_for_driver(&mut conn, message.driver_id).await?
            }
            Err(err) => return Err(err),
        },
        None => db::rides::get_active_for_driver(&mut conn, message.driver_id).await?,
    };

    let Some(ride) = ride else {
        return Ok(());
    };
    if !ride.status.delivers_locations() {
        return Ok(());
    }

    state
        .hub
        .notify_passenger(
            ride.passenger_id,
            &PassengerPush::DriverLocationUpdate {
                ride_id: ride.id,
                location: message.location,
                speed_kmh: message.speed_kmh,
                heading_degrees: message.heading_degrees,
                timestamp: message.timestamp,
                envelope: Envelope::new(PRODUCER, message.envelope.correlation_id),
            },
        )
        .await;

    Ok(())
}
