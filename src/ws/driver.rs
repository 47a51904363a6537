use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::stream::SplitStream;
use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Role;
use crate::contracts::{
    DriverFrame, DriverMatchResponse, DriverPush, DriverStatusMessage, Envelope, GeoPoint,
    EXCHANGE_DRIVER_TOPIC, ROUTE_DRIVER_RESPONSE_PREFIX, ROUTE_DRIVER_STATUS_PREFIX,
};
use crate::engine;
use crate::error::AppError;
use crate::models::driver::DriverStatus;
use crate::state::AppState;
use crate::ws::{ConnHandle, DRIVER_AUTH_DEADLINE, PING_INTERVAL, READ_DEADLINE};

const PRODUCER: &str = "driver-location-service";

pub async fn driver_ws(
    ws: WebSocketUpgrade,
    Path(driver_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_driver_socket(socket, driver_id, state))
}

async fn handle_driver_socket(socket: WebSocket, path_driver_id: Uuid, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let handle = ConnHandle::new(sink);

    // first frame must be auth, within the deadline
    let driver_id = match authenticate(&state, &handle, &mut stream, path_driver_id).await {
        Some(id) => id,
        None => {
            handle.close().await;
            return;
        }
    };

    let ack = DriverPush::AuthSuccess {
        message: "Authentication successful".to_string(),
        success: true,
        driver_id,
        timestamp: Utc::now(),
    };
    if handle.send_json(&ack).await.is_err() {
        return;
    }

    info!(driver_id = %driver_id, "driver socket connected");
    state.hub.register_driver(driver_id, handle.clone());
    state.metrics.ws_connections.with_label_values(&["driver"]).inc();

    let ping_handle = handle.clone();
    let ping_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if ping_handle.ping().await.is_err() {
                return;
            }
        }
    });

    // any inbound frame (pongs included) refreshes the read deadline
    let mut last_location_at: Option<Instant> = None;
    loop {
        let frame = match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Err(_) => {
                warn!(driver_id = %driver_id, "driver socket read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                warn!(driver_id = %driver_id, error = %err, "driver socket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // pings are answered by axum; pongs only refresh the deadline
            _ => continue,
        };

        let parsed: DriverFrame = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => {
                let _ = handle
                    .send_json(&DriverPush::Error { error: "bad json".to_string() })
                    .await;
                continue;
            }
        };

        let result = match parsed {
            DriverFrame::Auth { .. } => Ok(()), // already authenticated; ignore
            DriverFrame::RideResponse {
                ride_id,
                accepted,
                offer_id,
                estimated_arrival_minutes,
                current_location,
            } => {
                handle_ride_response(
                    &state,
                    &handle,
                    driver_id,
                    ride_id,
                    accepted,
                    offer_id,
                    estimated_arrival_minutes,
                    current_location,
                )
                .await
            }
            DriverFrame::DriverStatus { status } => {
                handle_driver_status(&state, &handle, driver_id, &status).await
            }
            DriverFrame::LocationUpdate { location } => {
                handle_location_update(&state, &handle, driver_id, location, &mut last_location_at)
                    .await
            }
        };

        if let Err(err) = result {
            warn!(driver_id = %driver_id, error = %err, "driver frame handling failed");
            let _ = handle
                .send_json(&DriverPush::Error { error: err.to_string() })
                .await;
        }
    }

    ping_task.abort();
    state.hub.stop_tracking(driver_id);
    state.hub.remove_driver(driver_id, &handle);
    state.metrics.ws_connections.with_label_values(&["driver"]).dec();
    handle.close().await;
    info!(driver_id = %driver_id, "driver socket disconnected");
}

async fn authenticate(
    state: &AppState,
    handle: &ConnHandle,
    stream: &mut SplitStream<WebSocket>,
    path_driver_id: Uuid,
) -> Option<Uuid> {
    let deadline_error = "authentication timeout: please send auth message within 5 seconds";
    let first = match tokio::time::timeout(DRIVER_AUTH_DEADLINE, stream.next()).await {
        Err(_) | Ok(None) => {
            send_auth_error(handle, deadline_error).await;
            return None;
        }
        Ok(Some(Err(_))) => {
            send_auth_error(handle, deadline_error).await;
            return None;
        }
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) => {
            send_auth_error(handle, "auth message must be in text format").await;
            return None;
        }
    };

    let token = match serde_json::from_str::<DriverFrame>(&first) {
        Ok(DriverFrame::Auth { token }) => token,
        _ => {
            send_auth_error(handle, "first message must be an auth frame").await;
            return None;
        }
    };

    let claims = match state.jwt.verify_bearer(&token, Role::Driver) {
        Ok(claims) => claims,
        Err(err) => {
            send_auth_error(handle, &format!("authentication failed: {err}")).await;
            return None;
        }
    };

    if claims.sub != path_driver_id {
        send_auth_error(handle, "driver ID mismatch").await;
        return None;
    }

    Some(claims.sub)
}

async fn send_auth_error(handle: &ConnHandle, message: &str) {
    let _ = handle
        .send_json(&DriverPush::AuthError { error: message.to_string(), success: false })
        .await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_ride_response(
    state: &Arc<AppState>,
    handle: &ConnHandle,
    driver_id: Uuid,
    ride_id: Uuid,
    accepted: bool,
    offer_id: Option<Uuid>,
    estimated_arrival_minutes: Option<u32>,
    current_location: Option<crate::contracts::LocationData>,
) -> Result<(), AppError> {
    if accepted {
        if let Some(location) = &current_location {
            state.hub.update_last_location(driver_id, location.clone()).await;
        }
        state.hub.start_tracking(driver_id);
    }

    let message = DriverMatchResponse {
        ride_id,
        driver_id,
        accepted,
        offer_id,
        estimated_arrival_minutes,
        driver_location: current_location
            .as_ref()
            .map(|loc| GeoPoint::new(loc.latitude, loc.longitude)),
        envelope: Envelope::new(PRODUCER, None),
    };

    let body = serde_json::to_vec(&message)
        .map_err(|err| AppError::Internal(format!("encode driver response: {err}")))?;
    let routing_key = format!("{ROUTE_DRIVER_RESPONSE_PREFIX}{ride_id}");
    state
        .broker
        .publish(EXCHANGE_DRIVER_TOPIC, &routing_key, &body)
        .await?;

    info!(
        driver_id = %driver_id,
        ride_id = %ride_id,
        accepted,
        routing_key = %routing_key,
        "driver response published"
    );

    let _ = handle
        .send_json(&DriverPush::RideResponseAck {
            ride_id,
            accepted,
            published: true,
            sent_at: Utc::now(),
        })
        .await;

    Ok(())
}

async fn handle_driver_status(
    state: &Arc<AppState>,
    handle: &ConnHandle,
    driver_id: Uuid,
    status: &str,
) -> Result<(), AppError> {
    let normalized = status.trim().to_uppercase();
    // progress markers (ARRIVED) ride on the same frame as plain driver
    // statuses; the ride service relays them onto the ride lifecycle
    let valid = normalized.parse::<DriverStatus>().is_ok() || normalized == "ARRIVED";
    if !valid {
        return Err(AppError::Validation(format!("invalid driver status: {status}")));
    }

    let ride_id = {
        let mut conn = state.pool.acquire().await?;
        crate::db::rides::get_active_for_driver(&mut conn, driver_id)
            .await?
            .map(|ride| ride.id)
    };

    let message = DriverStatusMessage {
        driver_id,
        status: normalized.clone(),
        ride_id,
        timestamp: Utc::now(),
        envelope: Envelope::new(PRODUCER, None),
    };

    let body = serde_json::to_vec(&message)
        .map_err(|err| AppError::Internal(format!("encode driver status: {err}")))?;
    let routing_key = format!("{ROUTE_DRIVER_STATUS_PREFIX}{driver_id}");
    state
        .broker
        .publish(EXCHANGE_DRIVER_TOPIC, &routing_key, &body)
        .await?;

    let _ = handle
        .send_json(&DriverPush::DriverStatusAck {
            status: normalized,
            published: true,
            sent_at: Utc::now(),
        })
        .await;

    Ok(())
}

async fn handle_location_update(
    state: &Arc<AppState>,
    handle: &ConnHandle,
    driver_id: Uuid,
    location: crate::contracts::LocationData,
    last_location_at: &mut Option<Instant>,
) -> Result<(), AppError> {
    // socket-side throttle mirrors the service-side 3 s rate limit
    if let Some(last) = last_location_at {
        if last.elapsed() < std::time::Duration::from_secs(3) {
            return Ok(());
        }
    }
    *last_location_at = Some(Instant::now());

    state.hub.update_last_location(driver_id, location.clone()).await;
    engine::drivers::update_location(state, driver_id, &location).await?;

    let _ = handle
        .send_json(&DriverPush::LocationUpdateAck {
            status: "success".to_string(),
            message: "Location updated and broadcasted".to_string(),
        })
        .await;

    Ok(())
}
