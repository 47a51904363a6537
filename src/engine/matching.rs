//! Candidate search and offer fan-out, driven by the `driver_matching`
//! queue.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::contracts::{
    DriverPush, Envelope, RideMatchRequest, QUEUE_DRIVER_MATCHING,
};
use crate::db;
use crate::db::drivers::AvailableDriver;
use crate::engine::pricing;
use crate::error::AppError;
use crate::geo;
use crate::state::AppState;

const PRODUCER: &str = "driver-location-service";
const DEFAULT_RADIUS_KM: f64 = 5.0;
const DEFAULT_TIMEOUT_SECONDS: u32 = 30;
const MAX_CANDIDATES: usize = 10;

/// A candidate with their distance to the pickup point.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub driver: AvailableDriver,
    pub distance_to_pickup_km: f64,
}

/// Filters drivers to the pickup radius and orders them ascending by
/// distance, descending by rating, capped at ten.
pub fn select_candidates(
    drivers: Vec<AvailableDriver>,
    pickup_lat: f64,
    pickup_lng: f64,
    radius_km: f64,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = drivers
        .into_iter()
        .filter_map(|driver| {
            let distance =
                geo::haversine_km(driver.latitude, driver.longitude, pickup_lat, pickup_lng);
            (distance <= radius_km).then_some(Candidate {
                driver,
                distance_to_pickup_km: distance,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_to_pickup_km
            .total_cmp(&b.distance_to_pickup_km)
            .then(b.driver.driver.rating.total_cmp(&a.driver.driver.rating))
    });
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

/// Consumes match requests, selects candidates, and pushes offers to every
/// candidate with an open socket. Offers are never persisted.
pub async fn run_matching_consumer(state: Arc<AppState>) {
    let broker = Arc::clone(&state.broker);
    broker
        .run_consumer(
            QUEUE_DRIVER_MATCHING,
            "driver-service-ride-requests",
            10,
            move |payload| {
                let state = Arc::clone(&state);
                async move {
                    let request: RideMatchRequest = serde_json::from_slice(&payload.data)
                        .map_err(|err| {
                            AppError::Validation(format!("bad match request: {err}"))
                        })?;
                    handle_match_request(&state, request).await
                }
            },
        )
        .await;
}

async fn handle_match_request(
    state: &Arc<AppState>,
    request: RideMatchRequest,
) -> Result<(), AppError> {
    let vehicle_type: crate::models::ride::VehicleType =
        request.ride_type.parse().map_err(AppError::Validation)?;

    let radius_km = if request.max_distance_km > 0.0 {
        request.max_distance_km
    } else {
        DEFAULT_RADIUS_KM
    };
    let timeout_seconds = if request.timeout_seconds > 0 {
        request.timeout_seconds
    } else {
        DEFAULT_TIMEOUT_SECONDS
    };

    let drivers = {
        let mut conn = state.pool.acquire().await?;
        db::drivers::find_available_with_location(&mut conn, vehicle_type).await?
    };

    let candidates = select_candidates(
        drivers,
        request.pickup_location.lat,
        request.pickup_location.lng,
        radius_km,
    );

    info!(
        ride_id = %request.ride_id,
        candidates = candidates.len(),
        vehicle_type = %request.ride_type,
        "candidates selected for match request"
    );

    let trip_km = geo::distance_between(&request.pickup_location, &request.destination_location);
    let estimated_ride_minutes = pricing::estimate_duration_minutes(trip_km);
    let expires_at = Utc::now() + ChronoDuration::seconds(timeout_seconds as i64);

    for candidate in candidates {
        let driver_id = candidate.driver.driver.id;
        if !state.hub.is_driver_connected(driver_id) {
            continue;
        }

        let offer = DriverPush::RideOffer {
            offer_id: Uuid::new_v4(),
            ride_id: request.ride_id,
            ride_number: request.ride_number.clone(),
            pickup_location: request.pickup_location.clone(),
            destination_location: request.destination_location.clone(),
            estimated_fare: request.estimated_fare,
            driver_earnings: pricing::driver_earnings(request.estimated_fare),
            distance_to_pickup_km: candidate.distance_to_pickup_km,
            estimated_ride_duration_minutes: estimated_ride_minutes,
            expires_at,
            envelope: Envelope::new(PRODUCER, request.envelope.correlation_id.clone()),
        };

        // a closed socket just means this candidate is skipped
        if let Err(err) = state.hub.send_to_driver(driver_id, &offer).await {
            warn!(driver_id = %driver_id, ride_id = %request.ride_id, error = %err, "offer push failed");
            continue;
        }

        info!(
            driver_id = %driver_id,
            ride_id = %request.ride_id,
            distance_km = candidate.distance_to_pickup_km,
            "ride offer sent"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::select_candidates;
    use crate::db::drivers::AvailableDriver;
    use crate::models::driver::{Driver, DriverStatus};
    use crate::models::ride::VehicleType;

    fn driver_at(lat: f64, lng: f64, rating: f64) -> AvailableDriver {
        AvailableDriver {
            driver: Driver {
                id: Uuid::new_v4(),
                license_number: "KZ-123".to_string(),
                vehicle_type: VehicleType::Economy,
                vehicle_attrs: json!({}),
                rating,
                total_rides: 0,
                total_earnings: 0.0,
                status: DriverStatus::Available,
                is_verified: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            latitude: lat,
            longitude: lng,
        }
    }

    const PICKUP: (f64, f64) = (43.238949, 76.889709);

    #[test]
    fn drivers_outside_the_radius_are_dropped() {
        let near = driver_at(43.2395, 76.8900, 4.5);
        let far = driver_at(43.35, 77.1, 5.0); // well over 5 km away

        let picked = select_candidates(vec![near.clone(), far], PICKUP.0, PICKUP.1, 5.0);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].driver.driver.id, near.driver.id);
    }

    #[test]
    fn closer_drivers_come_first() {
        let nearest = driver_at(43.2390, 76.8898, 3.0);
        let nearer = driver_at(43.2410, 76.8950, 5.0);
        let farther = driver_at(43.2550, 76.9200, 5.0);

        let picked = select_candidates(
            vec![farther.clone(), nearest.clone(), nearer.clone()],
            PICKUP.0,
            PICKUP.1,
            5.0,
        );

        let ids: Vec<_> = picked.iter().map(|c| c.driver.driver.id).collect();
        assert_eq!(ids, vec![nearest.driver.id, nearer.driver.id, farther.driver.id]);
    }

    #[test]
    fn rating_breaks_distance_ties() {
        let low = driver_at(43.2400, 76.8900, 4.1);
        let high = driver_at(43.2400, 76.8900, 4.9);

        let picked = select_candidates(vec![low.clone(), high.clone()], PICKUP.0, PICKUP.1, 5.0);
        assert_eq!(picked[0].driver.driver.id, high.driver.id);
        assert_eq!(picked[1].driver.driver.id, low.driver.id);
    }

    #[test]
    fn at_most_ten_candidates_are_kept() {
        let drivers: Vec<_> = (0..15)
            .map(|i| driver_at(43.2390 + i as f64 * 1e-4, 76.8898, 4.5))
            .collect();
        let picked = select_candidates(drivers, PICKUP.0, PICKUP.1, 5.0);
        assert_eq!(picked.len(), 10);
    }
}
