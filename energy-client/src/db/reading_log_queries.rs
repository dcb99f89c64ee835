use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::domain::ReadingLog;

/// Multi-row insert of reading logs in a single statement.
pub async fn insert_reading_logs(pool: &PgPool, logs: &[ReadingLog]) -> Result<u64> {
    if logs.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO reading_logs (ts, device_id, power_w, energy_kwh, cumulative_energy_kwh) ",
    );

    builder.push_values(logs, |mut b, log| {
        b.push_bind(log.ts)
            .push_bind(log.device_id)
            .push_bind(log.power_w)
            .push_bind(log.energy_kwh)
            .push_bind(log.cumulative_energy_kwh);
    });

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Fetch a time-ordered reading history for a single device.
pub async fn reading_logs_for_device(
    pool: &PgPool,
    device_id: i64,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<ReadingLog>> {
    let rows = sqlx::query_as::<_, ReadingLog>(
        r#"
        SELECT
            ts,
            device_id,
            power_w,
            energy_kwh,
            cumulative_energy_kwh
        FROM reading_logs
        WHERE device_id = $1
          AND ts >= $2
          AND ts <  $3
        ORDER BY ts
        "#,
    )
    .bind(device_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
