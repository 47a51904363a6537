use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ride::RideStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideEventType {
    RideRequested,
    DriverMatched,
    DriverArrived,
    RideStarted,
    RideCompleted,
    RideCancelled,
    StatusChanged,
    LocationUpdated,
    FareAdjusted,
}

impl RideEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideEventType::RideRequested => "RIDE_REQUESTED",
            RideEventType::DriverMatched => "DRIVER_MATCHED",
            RideEventType::DriverArrived => "DRIVER_ARRIVED",
            RideEventType::RideStarted => "RIDE_STARTED",
            RideEventType::RideCompleted => "RIDE_COMPLETED",
            RideEventType::RideCancelled => "RIDE_CANCELLED",
            RideEventType::StatusChanged => "STATUS_CHANGED",
            RideEventType::LocationUpdated => "LOCATION_UPDATED",
            RideEventType::FareAdjusted => "FARE_ADJUSTED",
        }
    }

    /// The specific event recorded for a transition into `status`.
    pub fn for_status(status: RideStatus) -> RideEventType {
        match status {
            RideStatus::Matched => RideEventType::DriverMatched,
            RideStatus::Arrived => RideEventType::DriverArrived,
            RideStatus::InProgress => RideEventType::RideStarted,
            RideStatus::Completed => RideEventType::RideCompleted,
            RideStatus::Cancelled => RideEventType::RideCancelled,
            _ => RideEventType::StatusChanged,
        }
    }
}

impl fmt::Display for RideEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of a ride state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideEvent {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub event_type: RideEventType,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_map_to_their_specific_events() {
        assert_eq!(
            RideEventType::for_status(RideStatus::Matched),
            RideEventType::DriverMatched
        );
        assert_eq!(
            RideEventType::for_status(RideStatus::Completed),
            RideEventType::RideCompleted
        );
        assert_eq!(
            RideEventType::for_status(RideStatus::EnRoute),
            RideEventType::StatusChanged
        );
    }
}
