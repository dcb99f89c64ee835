use std::time::Duration;

use anyhow::Result;
use monitor_service::{
    app::Monitor,
    billing::{BillingError, BillingOutcome},
    config::AppConfig,
    observability,
};
use tokio_util::sync::CancellationToken;

const DEFAULT_SAMPLE_SECS: u64 = 5;

/// Sample every device for a short window, then bill right away.
///
/// Usage: `bill_once [sample_secs] [email]`. With an email only that user
/// is billed, otherwise every configured user is.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let mut args = std::env::args().skip(1);
    let sample_secs = match args.next() {
        Some(arg) => arg
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("invalid sample seconds '{arg}': {e}"))?,
        None => DEFAULT_SAMPLE_SECS,
    };
    let email = args.next();

    let cfg = AppConfig::load()?;
    let shutdown = CancellationToken::new();
    let mut monitor = Monitor::build(&cfg, shutdown.clone()).await?;

    let reading_logs = monitor
        .reading_logs
        .take()
        .map(|pipeline| tokio::spawn(pipeline.run()));

    monitor.start_sampling().await;
    tokio::time::sleep(Duration::from_secs(sample_secs)).await;
    monitor.stop_sampling().await;

    let mut failures = 0usize;
    match &email {
        Some(email) => {
            let result = monitor.scheduler.bill_by_email(email).await;
            failures += report(email, result);
        }
        None => {
            let user_ids: Vec<i64> = monitor.scheduler.user_ids().collect();
            for user_id in user_ids {
                let result = monitor.scheduler.bill_now(user_id).await;
                failures += report(&format!("user {user_id}"), result);
            }
        }
    }

    shutdown.cancel();
    if let Some(handle) = reading_logs {
        if let Ok(Err(e)) = handle.await {
            tracing::error!(error = %e, "reading log pipeline failed");
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} user(s) could not be billed");
    }
    Ok(())
}

/// Log one billing result. Returns 1 on failure.
fn report(who: &str, result: Result<BillingOutcome, BillingError>) -> usize {
    match result {
        Ok(BillingOutcome::Created(bill)) => {
            tracing::info!(
                who,
                user_id = bill.user_id,
                bill_id = bill.id,
                total_energy_kwh = bill.total_energy_kwh,
                total_cost = bill.total_cost,
                "bill created"
            );
            0
        }
        Ok(BillingOutcome::AlreadyBilled { bill_date }) => {
            tracing::info!(who, %bill_date, "already billed today");
            0
        }
        Err(e) => {
            tracing::error!(who, error = %e, "billing failed");
            1
        }
    }
}
