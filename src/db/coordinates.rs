use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::coordinate::{validate_lat_lng, Coordinate, EntityType};

#[derive(Debug, sqlx::FromRow)]
struct CoordinateRow {
    id: Uuid,
    entity_id: Uuid,
    entity_type: String,
    address: String,
    latitude: f64,
    longitude: f64,
    fare_amount: Option<f64>,
    distance_km: Option<f64>,
    duration_minutes: Option<i32>,
    is_current: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CoordinateRow> for Coordinate {
    type Error = AppError;

    fn try_from(row: CoordinateRow) -> Result<Self, Self::Error> {
        Ok(Coordinate {
            id: row.id,
            entity_id: row.entity_id,
            entity_type: row.entity_type.parse().map_err(AppError::Internal)?,
            address: row.address,
            latitude: row.latitude,
            longitude: row.longitude,
            fare_amount: row.fare_amount,
            distance_km: row.distance_km,
            duration_minutes: row.duration_minutes,
            is_current: row.is_current,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COORDINATE_COLUMNS: &str = "id, entity_id, entity_type, address, latitude, longitude, \
     fare_amount, distance_km, duration_minutes, is_current, created_at, updated_at";

pub struct NewCoordinate {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Inserts a coordinate for the entity. When `make_current` is set, the
/// previous current row is flipped off in the same statement sequence so the
/// per-entity invariant (at most one `is_current = true`) holds inside the
/// surrounding transaction.
pub async fn insert(
    conn: &mut PgConnection,
    entity_id: Uuid,
    entity_type: EntityType,
    new: &NewCoordinate,
    make_current: bool,
) -> Result<Coordinate, AppError> {
    validate_lat_lng(new.latitude, new.longitude)?;

    if make_current {
        sqlx::query(
            r#"
            UPDATE coordinates
            SET is_current = false, updated_at = now()
            WHERE entity_id = $1 AND entity_type = $2 AND is_current = true
            "#,
        )
        .bind(entity_id)
        .bind(entity_type.as_str())
        .execute(&mut *conn)
        .await?;
    }

    let row = sqlx::query_as::<_, CoordinateRow>(&format!(
        r#"
        INSERT INTO coordinates (entity_id, entity_type, address, latitude, longitude, is_current)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {COORDINATE_COLUMNS}
        "#
    ))
    .bind(entity_id)
    .bind(entity_type.as_str())
    .bind(&new.address)
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(make_current)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

pub async fn get_current_for_driver(
    conn: &mut PgConnection,
    driver_id: Uuid,
) -> Result<Option<Coordinate>, AppError> {
    let row = sqlx::query_as::<_, CoordinateRow>(&format!(
        r#"
        SELECT {COORDINATE_COLUMNS}
        FROM coordinates
        WHERE entity_id = $1 AND entity_type = 'driver' AND is_current = true
        "#
    ))
    .bind(driver_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Coordinate::try_from).transpose()
}
