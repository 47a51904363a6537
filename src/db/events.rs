use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::RideEventType;

/// Appends a row to `ride_events`. Every status change writes exactly one of
/// these inside the same transaction as the status update.
pub async fn append(
    conn: &mut PgConnection,
    ride_id: Uuid,
    event_type: RideEventType,
    event_data: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO ride_events (ride_id, event_type, event_data)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(ride_id)
    .bind(event_type.as_str())
    .bind(event_data)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
