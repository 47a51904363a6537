use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Driver,
    Passenger,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Driver => "driver",
            EntityType::Passenger => "passenger",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "driver" => Ok(EntityType::Driver),
            "passenger" => Ok(EntityType::Passenger),
            other => Err(format!("invalid entity type: {other}")),
        }
    }
}

/// A stored position; per (entity_id, entity_type) at most one row is current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinate {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub fare_amount: Option<f64>,
    pub distance_km: Option<f64>,
    pub duration_minutes: Option<i32>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only GPS sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationHistory {
    pub id: Uuid,
    pub coordinate_id: Uuid,
    pub driver_id: Uuid,
    pub ride_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Rejects out-of-range coordinates and the (0, 0) null island marker, which
/// clients send when a fix is missing.
pub fn validate_lat_lng(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::Validation(format!(
            "latitude must be within [-90, 90], got {latitude}"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::Validation(format!(
            "longitude must be within [-180, 180], got {longitude}"
        )));
    }
    if latitude == 0.0 || longitude == 0.0 {
        return Err(AppError::Validation(
            "zero latitude or longitude is treated as unset".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_lat_lng;

    #[test]
    fn in_range_coordinates_pass() {
        assert!(validate_lat_lng(43.238949, 76.889709).is_ok());
        assert!(validate_lat_lng(-89.9, 179.9).is_ok());
    }

    #[test]
    fn out_of_range_coordinates_fail() {
        assert!(validate_lat_lng(90.1, 76.0).is_err());
        assert!(validate_lat_lng(-90.1, 76.0).is_err());
        assert!(validate_lat_lng(43.0, 180.5).is_err());
        assert!(validate_lat_lng(43.0, -181.0).is_err());
    }

    #[test]
    fn zero_lat_or_lng_is_treated_as_unset() {
        assert!(validate_lat_lng(0.0, 76.0).is_err());
        assert!(validate_lat_lng(43.0, 0.0).is_err());
    }
}
