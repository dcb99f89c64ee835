use time::OffsetDateTime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadingLog {
    pub ts: OffsetDateTime,
    pub device_id: i64,
    pub power_w: Option<f64>,
    pub energy_kwh: f64,
    pub cumulative_energy_kwh: f64,
}
