use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::events;
use crate::error::AppError;
use crate::models::event::RideEventType;
use crate::models::ride::{Ride, RideStatus, VehicleType};

#[derive(Debug, sqlx::FromRow)]
struct RideRow {
    id: Uuid,
    ride_number: String,
    passenger_id: Uuid,
    driver_id: Option<Uuid>,
    vehicle_type: String,
    status: String,
    priority: i32,
    requested_at: DateTime<Utc>,
    matched_at: Option<DateTime<Utc>>,
    arrived_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    estimated_fare: Option<f64>,
    final_fare: Option<f64>,
    pickup_coordinate_id: Option<Uuid>,
    destination_coordinate_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RideRow> for Ride {
    type Error = AppError;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        let vehicle_type: VehicleType = row
            .vehicle_type
            .parse()
            .map_err(AppError::Internal)?;
        let status: RideStatus = row.status.parse().map_err(AppError::Internal)?;

        Ok(Ride {
            id: row.id,
            ride_number: row.ride_number,
            passenger_id: row.passenger_id,
            driver_id: row.driver_id,
            vehicle_type,
            status,
            priority: row.priority,
            requested_at: row.requested_at,
            matched_at: row.matched_at,
            arrived_at: row.arrived_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            estimated_fare: row.estimated_fare,
            final_fare: row.final_fare,
            pickup_coordinate_id: row.pickup_coordinate_id,
            destination_coordinate_id: row.destination_coordinate_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RIDE_COLUMNS: &str = "id, ride_number, passenger_id, driver_id, vehicle_type, status, \
     priority, requested_at, matched_at, arrived_at, started_at, completed_at, cancelled_at, \
     cancellation_reason, estimated_fare, final_fare, pickup_coordinate_id, \
     destination_coordinate_id, created_at, updated_at";

pub struct NewRide {
    pub ride_number: String,
    pub passenger_id: Uuid,
    pub vehicle_type: VehicleType,
    pub priority: i32,
    pub estimated_fare: f64,
    pub pickup_coordinate_id: Uuid,
    pub destination_coordinate_id: Uuid,
}

/// Inserts a REQUESTED ride and its RIDE_REQUESTED event.
pub async fn create(conn: &mut PgConnection, new: &NewRide) -> Result<Ride, AppError> {
    let row = sqlx::query_as::<_, RideRow>(&format!(
        r#"
        INSERT INTO rides (
            ride_number, passenger_id, vehicle_type, status, priority,
            estimated_fare, pickup_coordinate_id, destination_coordinate_id
        )
        VALUES ($1, $2, $3, 'REQUESTED', $4, $5, $6, $7)
        RETURNING {RIDE_COLUMNS}
        "#
    ))
    .bind(&new.ride_number)
    .bind(new.passenger_id)
    .bind(new.vehicle_type.as_str())
    .bind(new.priority)
    .bind(new.estimated_fare)
    .bind(new.pickup_coordinate_id)
    .bind(new.destination_coordinate_id)
    .fetch_one(&mut *conn)
    .await?;

    let ride: Ride = row.try_into()?;

    events::append(
        conn,
        ride.id,
        RideEventType::RideRequested,
        json!({
            "new_status": RideStatus::Requested.as_str(),
            "estimated_fare": new.estimated_fare,
        }),
    )
    .await?;

    Ok(ride)
}

pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<Ride, AppError> {
    let row = sqlx::query_as::<_, RideRow>(&format!(
        "SELECT {RIDE_COLUMNS} FROM rides WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?;

    row.try_into()
}

/// Latest non-terminal ride assigned to the driver, if any.
pub async fn get_active_for_driver(
    conn: &mut PgConnection,
    driver_id: Uuid,
) -> Result<Option<Ride>, AppError> {
    let row = sqlx::query_as::<_, RideRow>(&format!(
        r#"
        SELECT {RIDE_COLUMNS}
        FROM rides
        WHERE driver_id = $1
          AND status IN ('MATCHED', 'EN_ROUTE', 'ARRIVED', 'IN_PROGRESS')
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(driver_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Ride::try_from).transpose()
}

/// Locks the row and returns its current status.
async fn lock_status(conn: &mut PgConnection, id: Uuid) -> Result<RideStatus, AppError> {
    let status: Option<(String,)> =
        sqlx::query_as("SELECT status FROM rides WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    status
        .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?
        .0
        .parse()
        .map_err(AppError::Internal)
}

fn timeline_column_for(status: RideStatus) -> &'static str {
    match status {
        RideStatus::Matched => "matched_at",
        RideStatus::Arrived => "arrived_at",
        RideStatus::InProgress => "started_at",
        RideStatus::Completed => "completed_at",
        RideStatus::Cancelled => "cancelled_at",
        // EN_ROUTE has no dedicated timeline column
        _ => "updated_at",
    }
}

/// The status-write contract: row lock, edge check, timeline stamp, event
/// append. A write from `s` to `s` is a no-op success; terminal states reject
/// everything else.
pub async fn update_status(
    conn: &mut PgConnection,
    id: Uuid,
    next: RideStatus,
    at: DateTime<Utc>,
) -> Result<(), AppError> {
    let current = lock_status(conn, id).await?;

    if current == next {
        return Ok(());
    }
    if current.is_terminal() {
        return Err(AppError::Terminal);
    }
    if !current.can_transition_to(next) {
        return Err(AppError::InvalidTransition(format!(
            "cannot move ride {id} from {current} to {next}"
        )));
    }

    let column = timeline_column_for(next);
    let query = if column == "updated_at" {
        "UPDATE rides SET status = $1, updated_at = now() WHERE id = $2".to_string()
    } else {
        format!("UPDATE rides SET status = $1, {column} = $3, updated_at = now() WHERE id = $2")
    };

    let mut q = sqlx::query(&query).bind(next.as_str()).bind(id);
    if column != "updated_at" {
        q = q.bind(at);
    }
    q.execute(&mut *conn).await?;

    events::append(
        conn,
        id,
        RideEventType::for_status(next),
        json!({
            "old_status": current.as_str(),
            "new_status": next.as_str(),
            "timestamp": at,
        }),
    )
    .await?;

    Ok(())
}

/// Sets the driver, stamps `matched_at`, moves REQUESTED -> MATCHED.
pub async fn assign_driver(
    conn: &mut PgConnection,
    ride_id: Uuid,
    driver_id: Uuid,
    matched_at: DateTime<Utc>,
) -> Result<(), AppError> {
    let row: Option<(String, Option<Uuid>)> =
        sqlx::query_as("SELECT status, driver_id FROM rides WHERE id = $1 FOR UPDATE")
            .bind(ride_id)
            .fetch_optional(&mut *conn)
            .await?;

    let (current_raw, existing_driver) =
        row.ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))?;
    let current: RideStatus = current_raw.parse().map_err(AppError::Internal)?;

    if current == RideStatus::Matched && existing_driver == Some(driver_id) {
        return Ok(());
    }
    if current.is_terminal() {
        return Err(AppError::Terminal);
    }
    if current != RideStatus::Requested {
        return Err(AppError::InvalidTransition(format!(
            "can only assign a driver while ride {ride_id} is REQUESTED, found {current}"
        )));
    }

    // a driver serves at most one non-terminal ride at a time
    let already_busy: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM rides
        WHERE driver_id = $1
          AND status IN ('MATCHED', 'EN_ROUTE', 'ARRIVED', 'IN_PROGRESS')
        LIMIT 1
        "#,
    )
    .bind(driver_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some((other,)) = already_busy {
        return Err(AppError::Conflict(format!(
            "driver {driver_id} already has an active ride {other}"
        )));
    }

    sqlx::query(
        r#"
        UPDATE rides
        SET driver_id = $1, status = 'MATCHED', matched_at = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(driver_id)
    .bind(matched_at)
    .bind(ride_id)
    .execute(&mut *conn)
    .await?;

    events::append(
        conn,
        ride_id,
        RideEventType::DriverMatched,
        json!({
            "old_status": current.as_str(),
            "new_status": RideStatus::Matched.as_str(),
            "driver_id": driver_id,
            "matched_at": matched_at,
        }),
    )
    .await?;

    Ok(())
}

/// Moves the ride to CANCELLED with a reason; idempotent when already
/// cancelled, rejected once completed.
pub async fn cancel(
    conn: &mut PgConnection,
    ride_id: Uuid,
    reason: &str,
    cancelled_at: DateTime<Utc>,
) -> Result<(), AppError> {
    let current = lock_status(conn, ride_id).await?;

    if current == RideStatus::Cancelled {
        return Ok(());
    }
    if current == RideStatus::Completed {
        return Err(AppError::Terminal);
    }

    sqlx::query(
        r#"
        UPDATE rides
        SET status = 'CANCELLED', cancellation_reason = $1, cancelled_at = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(reason)
    .bind(cancelled_at)
    .bind(ride_id)
    .execute(&mut *conn)
    .await?;

    events::append(
        conn,
        ride_id,
        RideEventType::RideCancelled,
        json!({
            "old_status": current.as_str(),
            "new_status": RideStatus::Cancelled.as_str(),
            "reason": reason,
            "cancelled_at": cancelled_at,
        }),
    )
    .await?;

    Ok(())
}

/// Moves IN_PROGRESS -> COMPLETED and persists the recomputed final fare.
pub async fn complete(
    conn: &mut PgConnection,
    ride_id: Uuid,
    final_fare: f64,
    completed_at: DateTime<Utc>,
) -> Result<(), AppError> {
    let current = lock_status(conn, ride_id).await?;

    if current == RideStatus::Completed {
        return Ok(());
    }
    if current.is_terminal() {
        return Err(AppError::Terminal);
    }
    if !current.can_transition_to(RideStatus::Completed) {
        return Err(AppError::InvalidTransition(format!(
            "cannot complete ride {ride_id} from {current}"
        )));
    }

    sqlx::query(
        r#"
        UPDATE rides
        SET status = 'COMPLETED', final_fare = $1, completed_at = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(final_fare)
    .bind(completed_at)
    .bind(ride_id)
    .execute(&mut *conn)
    .await?;

    events::append(
        conn,
        ride_id,
        RideEventType::RideCompleted,
        json!({
            "old_status": current.as_str(),
            "new_status": RideStatus::Completed.as_str(),
            "final_fare": final_fare,
            "completed_at": completed_at,
        }),
    )
    .await?;

    Ok(())
}
