//! Per-ride match supervisor: a timed auction over driver responses with
//! first-accept-wins semantics. Exactly one supervisor exists per ride and it
//! outlives the request that created the ride.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::QueueConsumer;
use crate::contracts::{
    DriverBrief, DriverMatchResponse, Envelope, PassengerPush, RideStatusMessage, VehicleInfo,
    QUEUE_DRIVER_RESPONSES,
};
use crate::db;
use crate::engine::rides::{publish_ride_status, PRODUCER};
use crate::error::AppError;
use crate::models::ride::RideStatus;
use crate::state::AppState;

pub const MATCH_DEADLINE: Duration = Duration::from_secs(5 * 60);
pub const NO_MATCH_REASON: &str = "NO_MATCH_TIMEOUT";
const RESPONSE_PREFETCH: u16 = 10;

pub fn spawn(state: Arc<AppState>, ride_id: Uuid, correlation_id: String) {
    tokio::spawn(supervise(state, ride_id, correlation_id));
}

async fn supervise(state: Arc<AppState>, ride_id: Uuid, correlation_id: String) {
    let started = Instant::now();
    let consumer_tag = format!("ride-match-{ride_id}");

    let consumer = match state
        .broker
        .consumer(QUEUE_DRIVER_RESPONSES, &consumer_tag, RESPONSE_PREFETCH)
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            // without a response stream the ride would stay REQUESTED forever
            error!(ride_id = %ride_id, error = %err, "supervisor could not consume driver responses");
            record_outcome(&state, "error", started);
            if let Err(err) = cancel_on_no_match(&state, ride_id, &correlation_id).await {
                error!(ride_id = %ride_id, error = %err, "failed to cancel unmatchable ride");
            }
            return;
        }
    };

    let deadline = tokio::time::sleep(MATCH_DEADLINE);
    tokio::pin!(deadline);

    let mut consumer = consumer;
    let outcome = tokio::select! {
        _ = &mut deadline => Outcome::Timeout,
        winner = first_accept(&mut consumer, ride_id) => match winner {
            Some(response) => Outcome::Winner(response),
            None => Outcome::StreamFailed,
        },
    };
    consumer.cancel().await;

    match outcome {
        Outcome::Winner(response) => {
            match mark_matched(&state, ride_id, &response, &correlation_id).await {
                Ok(true) => {
                    record_outcome(&state, "matched", started);
                    info!(
                        ride_id = %ride_id,
                        driver_id = %response.driver_id,
                        correlation_id = %correlation_id,
                        "ride matched"
                    );
                    return;
                }
                Ok(false) => {
                    // another writer got there first; nothing left to do
                    record_outcome(&state, "superseded", started);
                    return;
                }
                Err(err) => {
                    error!(ride_id = %ride_id, error = %err, "failed to persist match");
                    record_outcome(&state, "error", started);
                    if let Err(err) = cancel_on_no_match(&state, ride_id, &correlation_id).await {
                        error!(ride_id = %ride_id, error = %err, "failed to cancel after match error");
                    }
                    return;
                }
            }
        }
        Outcome::Timeout => {
            info!(ride_id = %ride_id, correlation_id = %correlation_id, "no driver accepted before the deadline");
        }
        Outcome::StreamFailed => {
            warn!(ride_id = %ride_id, "driver response stream failed");
        }
    }

    record_outcome(&state, "timeout", started);
    if let Err(err) = cancel_on_no_match(&state, ride_id, &correlation_id).await {
        error!(ride_id = %ride_id, error = %err, "failed to cancel ride on timeout");
    }
}

enum Outcome {
    Winner(DriverMatchResponse),
    Timeout,
    StreamFailed,
}

/// Drains the shared `driver_responses` queue and returns the first accept
/// for this ride. Everything else is acked and ignored.
async fn first_accept(
    consumer: &mut QueueConsumer,
    ride_id: Uuid,
) -> Option<DriverMatchResponse> {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(ride_id = %ride_id, error = %err, "driver response delivery failed");
                return None;
            }
        };

        let parsed: Result<DriverMatchResponse, _> = serde_json::from_slice(&delivery.data);
        let _ = delivery
            .ack(lapin::options::BasicAckOptions::default())
            .await;

        match parsed {
            Ok(response) if response.ride_id == ride_id && response.accepted => {
                return Some(response)
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "undecodable driver response dropped");
            }
        }
    }
    None
}

/// Assigns the winner if the ride is still REQUESTED. Returns false when the
/// ride already moved on (a later accept, a cancel).
async fn mark_matched(
    state: &Arc<AppState>,
    ride_id: Uuid,
    response: &DriverMatchResponse,
    correlation_id: &str,
) -> Result<bool, AppError> {
    let matched_at = Utc::now();

    let mut tx = state.pool.begin().await?;
    let ride = db::rides::get(&mut tx, ride_id).await?;
    if ride.status != RideStatus::Requested {
        return Ok(false);
    }

    db::rides::assign_driver(&mut tx, ride_id, response.driver_id, matched_at).await?;
    let driver = db::drivers::get(&mut tx, response.driver_id).await?;
    tx.commit().await?;

    if let Err(err) = publish_ride_status(
        state,
        &RideStatusMessage {
            ride_id,
            status: RideStatus::Matched.to_string(),
            timestamp: matched_at,
            driver_id: Some(response.driver_id),
            final_fare: None,
            envelope: Envelope::new(PRODUCER, Some(correlation_id.to_string())),
        },
    )
    .await
    {
        error!(ride_id = %ride_id, error = %err, "failed to publish matched status");
    }

    state
        .hub
        .notify_passenger(
            ride.passenger_id,
            &PassengerPush::RideStatusUpdate {
                ride_id,
                ride_number: Some(ride.ride_number.clone()),
                status: RideStatus::Matched.to_string(),
                driver_info: Some(DriverBrief {
                    driver_id: driver.id,
                    name: None,
                    rating: Some(driver.rating),
                    vehicle: serde_json::from_value::<VehicleInfo>(driver.vehicle_attrs.clone())
                        .ok(),
                }),
                envelope: Envelope::new(PRODUCER, Some(correlation_id.to_string())),
            },
        )
        .await;

    Ok(true)
}

/// The deadline path: still-REQUESTED rides become CANCELLED with
/// `NO_MATCH_TIMEOUT` so nothing stays stuck.
async fn cancel_on_no_match(
    state: &Arc<AppState>,
    ride_id: Uuid,
    correlation_id: &str,
) -> Result<(), AppError> {
    let cancelled_at = Utc::now();

    let mut tx = state.pool.begin().await?;
    let ride = db::rides::get(&mut tx, ride_id).await?;
    if ride.status != RideStatus::Requested {
        return Ok(());
    }

    db::rides::cancel(&mut tx, ride_id, NO_MATCH_REASON, cancelled_at).await?;
    tx.commit().await?;

    if let Err(err) = publish_ride_status(
        state,
        &RideStatusMessage {
            ride_id,
            status: RideStatus::Cancelled.to_string(),
            timestamp: cancelled_at,
            driver_id: None,
            final_fare: None,
            envelope: Envelope::new(PRODUCER, Some(correlation_id.to_string())),
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
                envelope: Envelope::new(PRODUCER, Some(correlation_id.to_string())),
            },
        )
        .await;

    Ok(())
}

fn record_outcome(state: &AppState, outcome: &str, started: Instant) {
    state
        .metrics
        .matches_total
        .with_label_values(&[outcome])
        .inc();
    state
        .metrics
        .match_latency_seconds
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());
}
