use anyhow::{Context, Result};
use monitor_service::{
    config::{AppConfig, PersistenceKind},
    observability,
    store::{EnergyRepository, PgRepository},
};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

const EXPORT_WINDOW_DAYS: i64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let mut args = std::env::args().skip(1);
    let device_id: i64 = args
        .next()
        .context("usage: export_reading_logs <device_id> [out.csv]")?
        .parse()
        .context("device_id must be an integer")?;
    let out_path = args
        .next()
        .unwrap_or_else(|| format!("reading_logs_device_{device_id}.csv"));

    let cfg = AppConfig::load()?;
    if cfg.persistence.kind != PersistenceKind::Postgres {
        anyhow::bail!("export_reading_logs requires postgres persistence");
    }

    // Schema is expected to be applied out-of-band via `sql/schema/*.sql`.
    let repo = PgRepository::connect(&cfg.persistence.uri, cfg.persistence.max_connections).await?;

    let end = OffsetDateTime::now_utc();
    let start = end - Duration::days(EXPORT_WINDOW_DAYS);
    let logs = repo.reading_logs_for_device(device_id, start, end).await?;

    let mut writer = csv::Writer::from_path(&out_path)
        .with_context(|| format!("failed to create {out_path}"))?;
    writer.write_record(["ts", "device_id", "power_w", "energy_kwh", "cumulative_energy_kwh"])?;
    for log in &logs {
        writer.write_record([
            log.ts.format(&Rfc3339)?,
            log.device_id.to_string(),
            log.power_w.map(|p| p.to_string()).unwrap_or_default(),
            log.energy_kwh.to_string(),
            log.cumulative_energy_kwh.to_string(),
        ])?;
    }
    writer.flush()?;

    tracing::info!(device_id, rows = logs.len(), path = %out_path, "reading logs exported");
    Ok(())
}
