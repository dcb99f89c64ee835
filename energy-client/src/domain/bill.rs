use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use time::{Date, OffsetDateTime};

/// One line of a tiered cost breakdown: `units` billed at `rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlabCharge {
    pub units: f64,
    pub rate: f64,
    pub cost: f64,
}

/// A bill that has not been written yet. `(user_id, bill_date)` is unique.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBill {
    pub user_id: i64,
    pub bill_date: Date,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub co2_emission_kg: f64,
    pub cost_breakdown: Vec<SlabCharge>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Bill {
    pub id: i64,
    pub user_id: i64,
    pub bill_date: Date,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub co2_emission_kg: f64,
    pub cost_breakdown: Json<Vec<SlabCharge>>,
    pub created_at: OffsetDateTime,
}
