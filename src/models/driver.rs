use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ride::VehicleType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Offline,
    Available,
    Busy,
    EnRoute,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Offline => "OFFLINE",
            DriverStatus::Available => "AVAILABLE",
            DriverStatus::Busy => "BUSY",
            DriverStatus::EnRoute => "EN_ROUTE",
        }
    }

    /// OFFLINE↔AVAILABLE; AVAILABLE→EN_ROUTE→BUSY→AVAILABLE; OFFLINE from any.
    pub fn can_transition_to(&self, next: DriverStatus) -> bool {
        if next == DriverStatus::Offline {
            return true;
        }
        match self {
            DriverStatus::Offline => next == DriverStatus::Available,
            DriverStatus::Available => {
                matches!(next, DriverStatus::EnRoute | DriverStatus::Busy)
            }
            DriverStatus::EnRoute => matches!(next, DriverStatus::Busy | DriverStatus::Available),
            DriverStatus::Busy => next == DriverStatus::Available,
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "OFFLINE" => Ok(DriverStatus::Offline),
            "AVAILABLE" => Ok(DriverStatus::Available),
            "BUSY" => Ok(DriverStatus::Busy),
            "EN_ROUTE" => Ok(DriverStatus::EnRoute),
            other => Err(format!("invalid driver status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub license_number: String,
    pub vehicle_type: VehicleType,
    pub vehicle_attrs: serde_json::Value,
    pub rating: f64,
    pub total_rides: i64,
    pub total_earnings: f64,
    pub status: DriverStatus,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Online span; at most one open (`ended_at IS NULL`) per driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSession {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_rides: i64,
    pub total_earnings: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_is_reachable_from_everywhere() {
        for from in [
            DriverStatus::Offline,
            DriverStatus::Available,
            DriverStatus::Busy,
            DriverStatus::EnRoute,
        ] {
            assert!(from.can_transition_to(DriverStatus::Offline));
        }
    }

    #[test]
    fn working_cycle_follows_available_en_route_busy() {
        assert!(DriverStatus::Offline.can_transition_to(DriverStatus::Available));
        assert!(DriverStatus::Available.can_transition_to(DriverStatus::EnRoute));
        assert!(DriverStatus::EnRoute.can_transition_to(DriverStatus::Busy));
        assert!(DriverStatus::Busy.can_transition_to(DriverStatus::Available));

        assert!(!DriverStatus::Offline.can_transition_to(DriverStatus::Busy));
        assert!(!DriverStatus::Busy.can_transition_to(DriverStatus::EnRoute));
    }
}
