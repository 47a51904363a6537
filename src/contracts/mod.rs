//! Wire contracts shared by the three services: broker topology names,
//! message bodies, and the socket frame vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Exchanges
pub const EXCHANGE_RIDE_TOPIC: &str = "ride_topic";
pub const EXCHANGE_DRIVER_TOPIC: &str = "driver_topic";
pub const EXCHANGE_LOCATION_FANOUT: &str = "location_fanout";

// Queues
pub const QUEUE_RIDE_REQUESTS: &str = "ride_requests";
pub const QUEUE_RIDE_STATUS: &str = "ride_status";
pub const QUEUE_DRIVER_MATCHING: &str = "driver_matching";
pub const QUEUE_DRIVER_RESPONSES: &str = "driver_responses";
pub const QUEUE_DRIVER_STATUS: &str = "driver_status";
pub const QUEUE_LOCATION_UPDATES_RIDE: &str = "location_updates_ride";

// Routing key prefixes; the suffix is {ride_type}, {status}, {ride_id}, {driver_id}
pub const ROUTE_RIDE_REQUEST_PREFIX: &str = "ride.request.";
pub const ROUTE_RIDE_STATUS_PREFIX: &str = "ride.status.";
pub const ROUTE_DRIVER_RESPONSE_PREFIX: &str = "driver.response.";
pub const ROUTE_DRIVER_STATUS_PREFIX: &str = "driver.status.";

/// Cross-cutting headers every message body may carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(producer: &str, correlation_id: Option<String>) -> Self {
        Self {
            correlation_id,
            producer: Some(producer.to_string()),
            sent_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng, address: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverBrief {
    pub driver_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleInfo>,
}

/// Published by the Ride Service to request matching.
/// Routing key: `ride.request.{ride_type}` on the ride topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideMatchRequest {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub pickup_location: GeoPoint,
    pub destination_location: GeoPoint,
    pub ride_type: String,
    #[serde(default)]
    pub estimated_fare: f64,
    #[serde(default)]
    pub max_distance_km: f64,
    #[serde(default)]
    pub timeout_seconds: u32,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Published when a driver answers an offer.
/// Routing key: `driver.response.{ride_id}` on the driver topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverMatchResponse {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_arrival_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_location: Option<GeoPoint>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Routing key: `ride.status.{status}` on the ride topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideStatusMessage {
    pub ride_id: Uuid,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_fare: Option<f64>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Routing key: `driver.status.{driver_id}` on the driver topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverStatusMessage {
    pub driver_id: Uuid,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Broadcast on the location fanout exchange (no routing key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdateMessage {
    pub driver_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<Uuid>,
    pub location: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// GPS sample as carried inside socket frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationData {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

// ---- inbound socket frames ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverFrame {
    Auth {
        token: String,
    },
    RideResponse {
        ride_id: Uuid,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        estimated_arrival_minutes: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_location: Option<LocationData>,
    },
    DriverStatus {
        status: String,
    },
    LocationUpdate {
        #[serde(flatten)]
        location: LocationData,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassengerFrame {
    Auth {
        token: String,
    },
    RideRequest {
        #[serde(default)]
        data: serde_json::Value,
    },
    RideCancel {
        ride_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

// ---- outbound socket frames ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverPush {
    AuthSuccess {
        message: String,
        success: bool,
        driver_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    AuthError {
        error: String,
        success: bool,
    },
    RideOffer {
        offer_id: Uuid,
        ride_id: Uuid,
        ride_number: String,
        pickup_location: GeoPoint,
        destination_location: GeoPoint,
        estimated_fare: f64,
        driver_earnings: f64,
        distance_to_pickup_km: f64,
        estimated_ride_duration_minutes: u32,
        expires_at: DateTime<Utc>,
        #[serde(flatten)]
        envelope: Envelope,
    },
    RideResponseAck {
        ride_id: Uuid,
        accepted: bool,
        published: bool,
        sent_at: DateTime<Utc>,
    },
    DriverStatusAck {
        status: String,
        published: bool,
        sent_at: DateTime<Utc>,
    },
    LocationUpdateAck {
        status: String,
        message: String,
    },
    /// Auto-tracker echo of the driver's last known point.
    LocationUpdate {
        data: LocationData,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassengerPush {
    AuthSuccess {
        message: String,
        success: bool,
        passenger_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    AuthError {
        error: String,
        success: bool,
    },
    RideStatusUpdate {
        ride_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ride_number: Option<String>,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        driver_info: Option<DriverBrief>,
        #[serde(flatten)]
        envelope: Envelope,
    },
    DriverLocationUpdate {
        ride_id: Uuid,
        location: GeoPoint,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed_kmh: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heading_degrees: Option<f64>,
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        envelope: Envelope,
    },
    RideRequestAck {
        status: String,
    },
    RideCancelAck {
        status: String,
    },
    Error {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T>(value: &T) -> T
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        let encoded = serde_json::to_string(value).unwrap();
        serde_json::from_str(&encoded).unwrap()
    }

    #[test]
    fn match_request_roundtrips() {
        let msg = RideMatchRequest {
            ride_id: Uuid::new_v4(),
            ride_number: "RIDE_20250101_120000_001".to_string(),
            pickup_location: GeoPoint::new(43.238949, 76.889709),
            destination_location: GeoPoint::new(43.25, 76.95),
            ride_type: "ECONOMY".to_string(),
            estimated_fare: 1757.0,
            max_distance_km: 5.0,
            timeout_seconds: 30,
            envelope: Envelope::new("ride-service", Some("req_x".to_string())),
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn driver_response_roundtrips_with_optional_fields_absent() {
        let msg = DriverMatchResponse {
            ride_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            accepted: true,
            offer_id: None,
            estimated_arrival_minutes: None,
            driver_location: None,
            envelope: Envelope::default(),
        };
        let encoded = serde_json::to_value(&msg).unwrap();
        assert!(encoded.get("offer_id").is_none());
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn location_fanout_message_roundtrips() {
        let msg = LocationUpdateMessage {
            driver_id: Uuid::new_v4(),
            ride_id: Some(Uuid::new_v4()),
            location: GeoPoint::new(43.24, 76.89),
            speed_kmh: Some(42.0),
            heading_degrees: Some(270.0),
            timestamp: Utc::now(),
            envelope: Envelope::new("driver-location-service", None),
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn driver_frames_dispatch_on_type_tag() {
        let frame: DriverFrame = serde_json::from_str(
            r#"{"type":"ride_response","ride_id":"6f4f5c3a-58b5-4f3c-9a4e-34c54b3f8e21","accepted":true}"#,
        )
        .unwrap();
        assert!(matches!(frame, DriverFrame::RideResponse { accepted: true, .. }));

        let frame: DriverFrame = serde_json::from_str(
            r#"{"type":"location_update","latitude":43.24,"longitude":76.89,"speed_kmh":40.0}"#,
        )
        .unwrap();
        match frame {
            DriverFrame::LocationUpdate { location } => {
                assert_eq!(location.latitude, 43.24);
                assert_eq!(location.speed_kmh, Some(40.0));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let result: Result<PassengerFrame, _> =
            serde_json::from_str(r#"{"type":"teleport","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn ride_offer_serializes_with_expected_tag() {
        let offer = DriverPush::RideOffer {
            offer_id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            ride_number: "RIDE_20250101_120000_001".to_string(),
            pickup_location: GeoPoint::new(43.238949, 76.889709),
            destination_location: GeoPoint::new(43.25, 76.95),
            estimated_fare: 1757.0,
            driver_earnings: 1405.6,
            distance_to_pickup_km: 1.2,
            estimated_ride_duration_minutes: 15,
            expires_at: Utc::now(),
            envelope: Envelope::new("driver-location-service", None),
        };
        let encoded = serde_json::to_value(&offer).unwrap();
        assert_eq!(encoded["type"], "ride_offer");
        assert_eq!(encoded["driver_earnings"], 1405.6);
        assert_eq!(roundtrip(&offer), offer);
    }
}
