use anyhow::Result;
use monitor_service::{
    app::Monitor, config::AppConfig, control_server, metrics_server, observability,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let shutdown = CancellationToken::new();
    let mut monitor = Monitor::build(&cfg, shutdown.clone()).await?;

    let control = match &cfg.control {
        Some(control_cfg) => Some(
            control_server::spawn(
                &control_cfg.bind_addr,
                monitor.control.clone(),
                shutdown.clone(),
            )
            .await?,
        ),
        None => None,
    };

    let reading_logs = monitor.reading_logs.take().map(|pipeline| {
        tokio::spawn(async move {
            if let Err(e) = pipeline.run().await {
                tracing::error!(error = %e, "reading log pipeline stopped");
            }
        })
    });

    monitor.start_sampling().await;

    let scheduler = monitor.scheduler.clone();
    let billing_cancel = CancellationToken::new();
    let billing = tokio::spawn({
        let cancel = billing_cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    // Sampling stops first so the last readings reach the pipeline, then
    // billing, then the pipeline drains and the control API closes.
    monitor.stop_sampling().await;
    billing_cancel.cancel();
    let _ = billing.await;
    shutdown.cancel();

    if let Some(handle) = reading_logs {
        let _ = handle.await;
    }
    if let Some(handle) = control {
        let _ = handle.await;
    }

    tracing::info!("monitor stopped");
    Ok(())
}
