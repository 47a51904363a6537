use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;

pub struct NewLocationSample {
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

/// Appends one row to `location_history`.
pub async fn archive(conn: &mut PgConnection, sample: &NewLocationSample) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO location_history (
            coordinate_id, driver_id, ride_id, latitude, longitude,
            accuracy_meters, speed_kmh, heading_degrees, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(sample.coordinate_id)
    .bind(sample.driver_id)
    .bind(sample.ride_id)
    .bind(sample.latitude)
    .bind(sample.longitude)
    .bind(sample.accuracy_meters)
    .bind(sample.speed_kmh)
    .bind(sample.heading_degrees)
    .bind(sample.recorded_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
