//! Socket gateway: authenticated driver and passenger connections, keyed by
//! identity, with all writes serialised through a per-connection mutex.

pub mod driver;
pub mod passenger;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contracts::{DriverPush, LocationData, PassengerPush};
use crate::error::AppError;

pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const READ_DEADLINE: Duration = Duration::from_secs(60);
pub const DRIVER_AUTH_DEADLINE: Duration = Duration::from_secs(5);
pub const PASSENGER_AUTH_DEADLINE: Duration = Duration::from_secs(10);
const TRACKER_INTERVAL: Duration = Duration::from_secs(3);

/// Write half of a socket behind the per-connection writer lock. The ping
/// loop, business pushes, and the auto-tracker all go through here.
#[derive(Clone)]
pub struct ConnHandle {
    sink: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

impl ConnHandle {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink: Arc::new(Mutex::new(sink)) }
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<(), AppError> {
        let payload = serde_json::to_string(value)
            .map_err(|err| AppError::Internal(format!("failed to encode frame: {err}")))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload))
            .await
            .map_err(|err| AppError::Internal(format!("socket write failed: {err}")))
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Ping(Vec::new()))
            .await
            .map_err(|err| AppError::Internal(format!("socket ping failed: {err}")))
    }

    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }

    fn same_connection(&self, other: &ConnHandle) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink)
    }
}

/// A registered driver connection plus the auto-tracking state that survives
/// between frames.
pub struct DriverEntry {
    handle: ConnHandle,
    last_location: RwLock<Option<LocationData>>,
    tracker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DriverEntry {
    fn drop(&mut self) {
        if let Ok(mut tracker) = self.tracker.lock() {
            if let Some(task) = tracker.take() {
                task.abort();
            }
        }
    }
}

#[derive(Default)]
pub struct SocketHub {
    drivers: DashMap<Uuid, Arc<DriverEntry>>,
    passengers: DashMap<Uuid, ConnHandle>,
}

impl SocketHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ---- driver directory ----

    /// Registers a driver connection. A duplicate registration replaces and
    /// closes the previous connection.
    pub fn register_driver(&self, driver_id: Uuid, handle: ConnHandle) {
        let entry = Arc::new(DriverEntry {
            handle,
            last_location: RwLock::new(None),
            tracker: std::sync::Mutex::new(None),
        });

        if let Some(previous) = self.drivers.insert(driver_id, entry) {
            info!(driver_id = %driver_id, "duplicate driver connection, closing previous");
            let old_handle = previous.handle.clone();
            tokio::spawn(async move { old_handle.close().await });
        }
    }

    /// Removes the driver's registration, but only when it still belongs to
    /// the given connection (a replacement must stay registered).
    pub fn remove_driver(&self, driver_id: Uuid, handle: &ConnHandle) {
        self.drivers
            .remove_if(&driver_id, |_, entry| entry.handle.same_connection(handle));
    }

    pub fn is_driver_connected(&self, driver_id: Uuid) -> bool {
        self.drivers.contains_key(&driver_id)
    }

    /// Pushes a frame to a driver. Absence of a connection is an error so the
    /// matcher can skip the candidate.
    pub async fn send_to_driver(&self, driver_id: Uuid, frame: &DriverPush) -> Result<(), AppError> {
        let handle = self
            .drivers
            .get(&driver_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} is not connected")))?;
        handle.send_json(frame).await
    }

    // ---- passenger directory ----

    pub fn register_passenger(&self, passenger_id: Uuid, handle: ConnHandle) {
        if let Some(previous) = self.passengers.insert(passenger_id, handle) {
            tokio::spawn(async move { previous.close().await });
        }
    }

    pub fn remove_passenger(&self, passenger_id: Uuid, handle: &ConnHandle) {
        self.passengers
            .remove_if(&passenger_id, |_, existing| existing.same_connection(handle));
    }

    /// Best-effort push to a passenger; a missing connection is silently
    /// dropped.
    pub async fn notify_passenger(&self, passenger_id: Uuid, frame: &PassengerPush) {
        let handle = match self.passengers.get(&passenger_id) {
            Some(handle) => handle.clone(),
            None => {
                debug!(passenger_id = %passenger_id, "passenger not connected, dropping push");
                return;
            }
        };

        if let Err(err) = handle.send_json(frame).await {
            warn!(passenger_id = %passenger_id, error = %err, "passenger push failed");
        }
    }

    // ---- auto-tracking ----

    pub async fn update_last_location(&self, driver_id: Uuid, location: LocationData) {
        // clone the entry out before awaiting; map refs must not be held
        // across suspension points
        let entry = match self.drivers.get(&driver_id) {
            Some(entry) => entry.clone(),
            None => return,
        };
        *entry.last_location.write().await = Some(location);
    }

    /// Starts the 3-second ticker that echoes the driver's last known point
    /// back on their socket until the ride completes or the socket dies.
    /// Idempotent while a tracker is already running.
    pub fn start_tracking(self: &Arc<Self>, driver_id: Uuid) {
        let entry = match self.drivers.get(&driver_id) {
            Some(entry) => entry.clone(),
            None => return,
        };

        let mut tracker = entry.tracker.lock().expect("tracker lock poisoned");
        if tracker.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let hub = Arc::clone(self);
        let task_entry = entry.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TRACKER_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let location = task_entry.last_location.read().await.clone();
                let Some(location) = location else { continue };

                let frame = DriverPush::LocationUpdate { data: location };
                if task_entry.handle.send_json(&frame).await.is_err() {
                    warn!(driver_id = %driver_id, "tracker write failed, stopping");
                    hub.stop_tracking(driver_id);
                    return;
                }
            }
        });

        *tracker = Some(task);
        info!(driver_id = %driver_id, "location auto-tracking started");
    }

    pub fn stop_tracking(&self, driver_id: Uuid) {
        if let Some(entry) = self.drivers.get(&driver_id) {
            if let Ok(mut tracker) = entry.tracker.lock() {
                if let Some(task) = tracker.take() {
                    task.abort();
                    info!(driver_id = %driver_id, "location auto-tracking stopped");
                }
            }
        }
    }
}
