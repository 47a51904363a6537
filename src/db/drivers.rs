use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus};
use crate::models::ride::VehicleType;

#[derive(Debug, sqlx::FromRow)]
struct DriverRow {
    id: Uuid,
    license_number: String,
    vehicle_type: String,
    vehicle_attrs: serde_json::Value,
    rating: f64,
    total_rides: i64,
    total_earnings: f64,
    status: String,
    is_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DriverRow> for Driver {
    type Error = AppError;

    fn try_from(row: DriverRow) -> Result<Self, Self::Error> {
        Ok(Driver {
            id: row.id,
            license_number: row.license_number,
            vehicle_type: row.vehicle_type.parse().map_err(AppError::Internal)?,
            vehicle_attrs: row.vehicle_attrs,
            rating: row.rating,
            total_rides: row.total_rides,
            total_earnings: row.total_earnings,
            status: row.status.parse().map_err(AppError::Internal)?,
            is_verified: row.is_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const DRIVER_COLUMNS: &str = "id, license_number, vehicle_type, vehicle_attrs, rating, \
     total_rides, total_earnings, status, is_verified, created_at, updated_at";

pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<Driver, AppError> {
    let row = sqlx::query_as::<_, DriverRow>(&format!(
        "SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    row.try_into()
}

/// Sets the driver status; a write to the current status is a no-op success.
pub async fn update_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: DriverStatus,
) -> Result<(), AppError> {
    let current: Option<(String,)> =
        sqlx::query_as("SELECT status FROM drivers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    let current: DriverStatus = current
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?
        .0
        .parse()
        .map_err(AppError::Internal)?;

    if current == status {
        return Ok(());
    }

    sqlx::query("UPDATE drivers SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// A matching candidate: the driver plus their current position.
#[derive(Debug, Clone)]
pub struct AvailableDriver {
    pub driver: Driver,
    pub latitude: f64,
    pub longitude: f64,
}

/// AVAILABLE drivers of the class joined with their current coordinate.
/// Radius filtering and distance ordering happen in the matching engine.
pub async fn find_available_with_location(
    conn: &mut PgConnection,
    vehicle_type: VehicleType,
) -> Result<Vec<AvailableDriver>, AppError> {
    #[derive(sqlx::FromRow)]
    struct CandidateRow {
        id: Uuid,
        license_number: String,
        vehicle_type: String,
        vehicle_attrs: serde_json::Value,
        rating: f64,
        total_rides: i64,
        total_earnings: f64,
        status: String,
        is_verified: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    }

    let rows = sqlx::query_as::<_, CandidateRow>(
        r#"
        SELECT
            d.id, d.license_number, d.vehicle_type, d.vehicle_attrs,
            d.rating, d.total_rides, d.total_earnings,
            d.status, d.is_verified, d.created_at, d.updated_at,
            c.latitude, c.longitude
        FROM drivers d
        JOIN coordinates c
          ON c.entity_id = d.id
         AND c.entity_type = 'driver'
         AND c.is_current = true
        WHERE d.status = 'AVAILABLE'
          AND d.vehicle_type = $1
        "#,
    )
    .bind(vehicle_type.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            let latitude = row.latitude;
            let longitude = row.longitude;
            let driver = DriverRow {
                id: row.id,
                license_number: row.license_number,
                vehicle_type: row.vehicle_type,
                vehicle_attrs: row.vehicle_attrs,
                rating: row.rating,
                total_rides: row.total_rides,
                total_earnings: row.total_earnings,
                status: row.status,
                is_verified: row.is_verified,
                created_at: row.created_at,
                updated_at: row.updated_at,
            }
            .try_into()?;
            Ok(AvailableDriver { driver, latitude, longitude })
        })
        .collect()
}

/// Monotonic counters: one more ride, `earnings` more revenue.
pub async fn increment_counters_on_complete(
    conn: &mut PgConnection,
    id: Uuid,
    earnings: f64,
) -> Result<(), AppError> {
    if earnings < 0.0 {
        return Err(AppError::Validation("earnings cannot be negative".to_string()));
    }

    sqlx::query(
        r#"
        UPDATE drivers
        SET total_rides = total_rides + 1,
            total_earnings = total_earnings + $1,
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(earnings)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
