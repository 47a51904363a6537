use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverSession;

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    driver_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    total_rides: i64,
    total_earnings: f64,
}

impl From<SessionRow> for DriverSession {
    fn from(row: SessionRow) -> Self {
        DriverSession {
            id: row.id,
            driver_id: row.driver_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            total_rides: row.total_rides,
            total_earnings: row.total_earnings,
        }
    }
}

/// Opens a session for the driver. Re-uses the already open session if there
/// is one, so going online twice never creates a second open span.
pub async fn start(conn: &mut PgConnection, driver_id: Uuid) -> Result<Uuid, AppError> {
    let open: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM driver_sessions WHERE driver_id = $1 AND ended_at IS NULL",
    )
    .bind(driver_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((id,)) = open {
        return Ok(id);
    }

    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO driver_sessions (driver_id, started_at, total_rides, total_earnings)
        VALUES ($1, now(), 0, 0)
        RETURNING id
        "#,
    )
    .bind(driver_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn get_active_for_driver(
    conn: &mut PgConnection,
    driver_id: Uuid,
) -> Result<DriverSession, AppError> {
    let row = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT id, driver_id, started_at, ended_at, total_rides, total_earnings
        FROM driver_sessions
        WHERE driver_id = $1 AND ended_at IS NULL
        "#,
    )
    .bind(driver_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("no open session for driver {driver_id}")))?;

    Ok(row.into())
}

/// Adds one completed ride and its earnings to the open session's totals.
pub async fn add_completed_ride(
    conn: &mut PgConnection,
    session_id: Uuid,
    earnings: f64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE driver_sessions
        SET total_rides = total_rides + 1,
            total_earnings = total_earnings + $1
        WHERE id = $2 AND ended_at IS NULL
        "#,
    )
    .bind(earnings)
    .bind(session_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn end(
    conn: &mut PgConnection,
    session_id: Uuid,
    ended_at: DateTime<Utc>,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE driver_sessions SET ended_at = $1 WHERE id = $2 AND ended_at IS NULL",
    )
    .bind(ended_at)
    .bind(session_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "session {session_id} is already ended"
        )));
    }

    Ok(())
}
