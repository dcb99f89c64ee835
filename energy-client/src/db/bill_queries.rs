use anyhow::Result;
use sqlx::{types::Json, PgPool};

use crate::domain::{Bill, NewBill};

/// Insert a bill unless one already exists for the same user and date.
///
/// Returns `None` when the `(user_id, bill_date)` key was already taken, so
/// callers can tell a duplicate trigger apart from a fresh bill.
pub async fn insert_bill_if_absent(pool: &PgPool, bill: &NewBill) -> Result<Option<Bill>> {
    let row = sqlx::query_as::<_, Bill>(
        r#"
        INSERT INTO electricity_bills
            (user_id, bill_date, total_energy_kwh, total_cost, co2_emission_kg, cost_breakdown)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, bill_date) DO NOTHING
        RETURNING
            id,
            user_id,
            bill_date,
            total_energy_kwh,
            total_cost,
            co2_emission_kg,
            cost_breakdown,
            created_at
        "#,
    )
    .bind(bill.user_id)
    .bind(bill.bill_date)
    .bind(bill.total_energy_kwh)
    .bind(bill.total_cost)
    .bind(bill.co2_emission_kg)
    .bind(Json(&bill.cost_breakdown))
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Bill history for one user, newest first.
pub async fn bills_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Bill>> {
    let rows = sqlx::query_as::<_, Bill>(
        r#"
        SELECT
            id,
            user_id,
            bill_date,
            total_energy_kwh,
            total_cost,
            co2_emission_kg,
            cost_breakdown,
            created_at
        FROM electricity_bills
        WHERE user_id = $1
        ORDER BY bill_date DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
