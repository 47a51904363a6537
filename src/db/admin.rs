//! Read-only aggregate queries backing the admin service.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverStatus;
use crate::models::ride::VehicleType;

const ACTIVE_STATUSES: &str = "('REQUESTED', 'MATCHED', 'EN_ROUTE', 'ARRIVED', 'IN_PROGRESS')";

pub async fn count_active_rides(conn: &mut PgConnection) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM rides WHERE status IN {ACTIVE_STATUSES}"
    ))
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

pub async fn count_rides_created_between(
    conn: &mut PgConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<i64, AppError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM rides WHERE created_at >= $1 AND created_at < $2")
            .bind(from)
            .bind(to)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count)
}

pub async fn sum_revenue_between(
    conn: &mut PgConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<f64, AppError> {
    let (sum,): (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT SUM(final_fare) FROM rides
        WHERE status = 'COMPLETED' AND completed_at >= $1 AND completed_at < $2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(&mut *conn)
    .await?;
    Ok(sum.unwrap_or(0.0))
}

pub async fn avg_wait_minutes_between(
    conn: &mut PgConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<f64, AppError> {
    let (avg,): (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG(EXTRACT(EPOCH FROM (matched_at - requested_at)) / 60.0)::float8
        FROM rides
        WHERE matched_at IS NOT NULL AND created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(&mut *conn)
    .await?;
    Ok(avg.unwrap_or(0.0))
}

pub async fn avg_ride_duration_minutes_between(
    conn: &mut PgConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<f64, AppError> {
    let (avg,): (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG(EXTRACT(EPOCH FROM (completed_at - started_at)) / 60.0)::float8
        FROM rides
        WHERE completed_at IS NOT NULL AND started_at IS NOT NULL
          AND created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(&mut *conn)
    .await?;
    Ok(avg.unwrap_or(0.0))
}

pub async fn cancellation_rate_between(
    conn: &mut PgConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<f64, AppError> {
    let (total, cancelled): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE status = 'CANCELLED')
        FROM rides
        WHERE created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(&mut *conn)
    .await?;

    if total == 0 {
        return Ok(0.0);
    }
    Ok(cancelled as f64 / total as f64)
}

pub async fn count_drivers_by_status(
    conn: &mut PgConnection,
    status: DriverStatus,
) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM drivers WHERE status = $1")
        .bind(status.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn count_drivers_by_vehicle_type(
    conn: &mut PgConnection,
    vehicle_type: VehicleType,
) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM drivers WHERE vehicle_type = $1")
        .bind(vehicle_type.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// One row of the active-rides listing, hydrated with addresses and the
/// driver's current position.
#[derive(Debug, sqlx::FromRow)]
pub struct ActiveRideRow {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub status: String,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup_address: Option<String>,
    pub destination_address: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub driver_latitude: Option<f64>,
    pub driver_longitude: Option<f64>,
}

pub async fn list_active_rides(
    conn: &mut PgConnection,
    offset: i64,
    limit: i64,
) -> Result<Vec<ActiveRideRow>, AppError> {
    let rows = sqlx::query_as::<_, ActiveRideRow>(&format!(
        r#"
        SELECT
            r.id AS ride_id,
            r.ride_number,
            r.status,
            r.passenger_id,
            r.driver_id,
            pc.address AS pickup_address,
            dc.address AS destination_address,
            r.requested_at,
            cur.latitude AS driver_latitude,
            cur.longitude AS driver_longitude
        FROM rides r
        LEFT JOIN coordinates pc ON pc.id = r.pickup_coordinate_id
        LEFT JOIN coordinates dc ON dc.id = r.destination_coordinate_id
        LEFT JOIN coordinates cur
               ON cur.entity_id = r.driver_id
              AND cur.entity_type = 'driver'
              AND cur.is_current = true
        WHERE r.status IN {ACTIVE_STATUSES}
        ORDER BY r.requested_at DESC
        OFFSET $1 LIMIT $2
        "#
    ))
    .bind(offset)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
