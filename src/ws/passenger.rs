use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::stream::SplitStream;
use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Role;
use crate::contracts::{PassengerFrame, PassengerPush, EXCHANGE_RIDE_TOPIC};
use crate::error::AppError;
use crate::state::AppState;
use crate::ws::{ConnHandle, PASSENGER_AUTH_DEADLINE, PING_INTERVAL, READ_DEADLINE};

pub async fn passenger_ws(
    ws: WebSocketUpgrade,
    Path(passenger_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_passenger_socket(socket, passenger_id, state))
}

async fn handle_passenger_socket(socket: WebSocket, path_passenger_id: Uuid, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let handle = ConnHandle::new(sink);

    let passenger_id = match authenticate(&state, &handle, &mut stream, path_passenger_id).await {
        Some(id) => id,
        None => {
            handle.close().await;
            return;
        }
    };

    let ack = PassengerPush::AuthSuccess {
        message: "Authentication successful".to_string(),
        success: true,
        passenger_id,
        timestamp: Utc::now(),
    };
    if handle.send_json(&ack).await.is_err() {
        return;
    }

    info!(passenger_id = %passenger_id, "passenger socket connected");
    state.hub.register_passenger(passenger_id, handle.clone());
    state.metrics.ws_connections.with_label_values(&["passenger"]).inc();

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

    loop {
        let frame = match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Err(_) => {
                warn!(passenger_id = %passenger_id, "passenger socket read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                warn!(passenger_id = %passenger_id, error = %err, "passenger socket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let parsed: PassengerFrame = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => {
                let _ = handle
                    .send_json(&PassengerPush::Error { error: "bad json".to_string() })
                    .await;
                continue;
            }
        };

        let result = match parsed {
            PassengerFrame::Auth { .. } => continue, // already authenticated; ignore
            PassengerFrame::RideRequest { data } => {
                publish_wrapped(
                    &state,
                    &format!("ride.request.{passenger_id}"),
                    json!({
                        "type": "ride_request",
                        "passenger_id": passenger_id,
                        "data": data,
                        "requested_at": Utc::now(),
                    }),
                )
                .await
                .map(|_| PassengerPush::RideRequestAck { status: "ok".to_string() })
            }
            PassengerFrame::RideCancel { ride_id, reason } => {
                publish_wrapped(
                    &state,
                    &format!("ride.cancel.{passenger_id}"),
                    json!({
                        "type": "ride_cancel",
                        "passenger_id": passenger_id,
                        "data": { "ride_id": ride_id, "reason": reason },
                        "cancelled_at": Utc::now(),
                    }),
                )
                .await
                .map(|_| PassengerPush::RideCancelAck { status: "ok".to_string() })
            }
        };

        match result {
            Ok(ack) => {
                let _ = handle.send_json(&ack).await;
            }
            Err(err) => {
                warn!(passenger_id = %passenger_id, error = %err, "passenger frame handling failed");
                let _ = handle
                    .send_json(&PassengerPush::Error { error: err.to_string() })
                    .await;
            }
        }
    }

    ping_task.abort();
    state.hub.remove_passenger(passenger_id, &handle);
    state.metrics.ws_connections.with_label_values(&["passenger"]).dec();
    handle.close().await;
    info!(passenger_id = %passenger_id, "passenger socket disconnected");
}

async fn authenticate(
    state: &AppState,
    handle: &ConnHandle,
    stream: &mut SplitStream<WebSocket>,
    path_passenger_id: Uuid,
) -> Option<Uuid> {
    let deadline_error = "authentication timeout: please send auth message within 10 seconds";
    let first = match tokio::time::timeout(PASSENGER_AUTH_DEADLINE, stream.next()).await {
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

    let token = match serde_json::from_str::<PassengerFrame>(&first) {
        Ok(PassengerFrame::Auth { token }) => token,
        _ => {
            send_auth_error(handle, "first message must be an auth frame").await;
            return None;
        }
    };

    let claims = match state.jwt.verify_bearer(&token, Role::Passenger) {
        Ok(claims) => claims,
        Err(err) => {
            send_auth_error(handle, &format!("authentication failed: {err}")).await;
            return None;
        }
    };

    if claims.sub != path_passenger_id {
        send_auth_error(handle, "passenger ID mismatch").await;
        return None;
    }

    Some(claims.sub)
}

async fn send_auth_error(handle: &ConnHandle, message: &str) {
    let _ = handle
        .send_json(&PassengerPush::AuthError { error: message.to_string(), success: false })
        .await;
}

/// Passenger commands are wrapped with routing metadata and forwarded to the
/// ride topic; full validation happens in the ride service.
async fn publish_wrapped(
    state: &AppState,
    routing_key: &str,
    body: serde_json::Value,
) -> Result<(), AppError> {
    let payload = serde_json::to_vec(&body)
        .map_err(|err| AppError::Internal(format!("encode passenger command: {err}")))?;
    state
        .broker
        .publish(EXCHANGE_RIDE_TOPIC, routing_key, &payload)
        .await
}
