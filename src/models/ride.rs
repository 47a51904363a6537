use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Economy,
    Premium,
    Xl,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Economy => "ECONOMY",
            VehicleType::Premium => "PREMIUM",
            VehicleType::Xl => "XL",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "ECONOMY" => Ok(VehicleType::Economy),
            "PREMIUM" => Ok(VehicleType::Premium),
            "XL" => Ok(VehicleType::Xl),
            other => Err(format!("invalid vehicle type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    Matched,
    EnRoute,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Matched => "MATCHED",
            RideStatus::EnRoute => "EN_ROUTE",
            RideStatus::Arrived => "ARRIVED",
            RideStatus::InProgress => "IN_PROGRESS",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// The lifecycle graph. EN_ROUTE is an optional stop between MATCHED and
    /// ARRIVED.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        match self {
            RideStatus::Requested => {
                matches!(next, RideStatus::Matched | RideStatus::Cancelled)
            }
            RideStatus::Matched => matches!(
                next,
                RideStatus::EnRoute | RideStatus::Arrived | RideStatus::Cancelled
            ),
            RideStatus::EnRoute => {
                matches!(next, RideStatus::Arrived | RideStatus::Cancelled)
            }
            RideStatus::Arrived => {
                matches!(next, RideStatus::InProgress | RideStatus::Cancelled)
            }
            RideStatus::InProgress => {
                matches!(next, RideStatus::Completed | RideStatus::Cancelled)
            }
            RideStatus::Completed | RideStatus::Cancelled => false,
        }
    }

    /// Statuses for which driver positions are forwarded to the passenger.
    pub fn delivers_locations(&self) -> bool {
        matches!(
            self,
            RideStatus::Matched | RideStatus::EnRoute | RideStatus::Arrived | RideStatus::InProgress
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "REQUESTED" => Ok(RideStatus::Requested),
            "MATCHED" => Ok(RideStatus::Matched),
            "EN_ROUTE" => Ok(RideStatus::EnRoute),
            "ARRIVED" => Ok(RideStatus::Arrived),
            "IN_PROGRESS" => Ok(RideStatus::InProgress),
            "COMPLETED" => Ok(RideStatus::Completed),
            "CANCELLED" => Ok(RideStatus::Cancelled),
            other => Err(format!("invalid ride status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub ride_number: String,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub vehicle_type: VehicleType,
    pub status: RideStatus,
    pub priority: i32,
    pub requested_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub estimated_fare: Option<f64>,
    pub final_fare: Option<f64>,
    pub pickup_coordinate_id: Option<Uuid>,
    pub destination_coordinate_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Human-readable ride number: `RIDE_YYYYMMDD_HHMMSS_mmm`.
pub fn generate_ride_number(now: DateTime<Utc>) -> String {
    format!(
        "RIDE_{}_{:03}",
        now.format("%Y%m%d_%H%M%S"),
        now.timestamp_subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_can_only_match_or_cancel() {
        let from = RideStatus::Requested;
        assert!(from.can_transition_to(RideStatus::Matched));
        assert!(from.can_transition_to(RideStatus::Cancelled));
        assert!(!from.can_transition_to(RideStatus::Arrived));
        assert!(!from.can_transition_to(RideStatus::InProgress));
        assert!(!from.can_transition_to(RideStatus::Completed));
    }

    #[test]
    fn en_route_is_an_optional_stop() {
        assert!(RideStatus::Matched.can_transition_to(RideStatus::EnRoute));
        assert!(RideStatus::Matched.can_transition_to(RideStatus::Arrived));
        assert!(RideStatus::EnRoute.can_transition_to(RideStatus::Arrived));
        assert!(!RideStatus::EnRoute.can_transition_to(RideStatus::InProgress));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for next in [
            RideStatus::Requested,
            RideStatus::Matched,
            RideStatus::Arrived,
            RideStatus::InProgress,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ] {
            assert!(!RideStatus::Completed.can_transition_to(next));
            assert!(!RideStatus::Cancelled.can_transition_to(next));
        }
        assert!(RideStatus::Completed.is_terminal());
        assert!(RideStatus::Cancelled.is_terminal());
    }

    #[test]
    fn every_active_state_can_cancel() {
        for from in [
            RideStatus::Requested,
            RideStatus::Matched,
            RideStatus::EnRoute,
            RideStatus::Arrived,
            RideStatus::InProgress,
        ] {
            assert!(from.can_transition_to(RideStatus::Cancelled), "{from} must cancel");
        }
    }

    #[test]
    fn locations_flow_only_while_a_driver_is_en_route_or_driving() {
        assert!(RideStatus::Matched.delivers_locations());
        assert!(RideStatus::InProgress.delivers_locations());
        assert!(!RideStatus::Requested.delivers_locations());
        assert!(!RideStatus::Completed.delivers_locations());
    }

    #[test]
    fn vehicle_type_parsing_is_case_insensitive_and_strict() {
        assert_eq!("economy".parse::<VehicleType>().unwrap(), VehicleType::Economy);
        assert_eq!(" XL ".parse::<VehicleType>().unwrap(), VehicleType::Xl);
        assert!("LUXURY".parse::<VehicleType>().is_err());
    }

    #[test]
    fn ride_number_has_the_documented_shape() {
        let number = generate_ride_number(Utc::now());
        assert!(number.starts_with("RIDE_"));
        let parts: Vec<&str> = number.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 3);
    }
}
