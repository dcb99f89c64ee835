//! Builds the running service from an [`AppConfig`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use energy_client::domain::{ReadingLog, User};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    accumulator::Accumulator,
    billing::BillGenerator,
    config::{AppConfig, PersistenceKind},
    control_server::{ControlState, ControlledDevice},
    notify::{Dispatcher, FcmPushClient, Notifier, SmtpMailer},
    pipeline::{Pipeline, Transform},
    scheduler::{BillingJob, BillingScheduler, SystemClock},
    sinks::ReadingLogSink,
    sources::{BlynkClient, ChannelSource, DeviceAddress, EnergyFromPower},
    store::{EnergyRepository, InMemoryRepository, PgRepository, UserLookup},
    transform::{AlertTarget, PowerLimitAlert, ReadingLogValidation},
};

pub type ReadingLogPipeline = Pipeline<ChannelSource<ReadingLog>, ReadingLog, ReadingLogSink>;

pub async fn build_repository(cfg: &AppConfig) -> anyhow::Result<Arc<dyn EnergyRepository>> {
    match cfg.persistence.kind {
        PersistenceKind::Postgres => {
            let repo = PgRepository::connect(&cfg.persistence.uri, cfg.persistence.max_connections)
                .await
                .context("failed to connect to postgres")?;
            Ok(Arc::new(repo))
        }
        PersistenceKind::Memory => {
            let users: Vec<User> = cfg.users.iter().cloned().map(User::from).collect();
            info!(users = users.len(), "using in-memory persistence");
            Ok(Arc::new(InMemoryRepository::with_users(users)))
        }
    }
}

pub fn build_notifier(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    let email = match &cfg.notify.email {
        Some(e) => Some(SmtpMailer::new(
            &e.smtp_host,
            e.smtp_port,
            e.username.clone(),
            e.password.clone(),
            &e.from,
            Duration::from_millis(e.timeout_ms),
        )?),
        None => None,
    };
    let push = match &cfg.notify.push {
        Some(p) => Some(FcmPushClient::new(
            p.endpoint.clone(),
            p.server_key.clone(),
            Duration::from_millis(p.timeout_ms),
        )?),
        None => None,
    };
    Ok(Arc::new(Dispatcher::new(email, push)))
}

/// Every long-lived component of the monitor, not yet running.
pub struct Monitor {
    pub accumulators: Vec<Arc<Accumulator>>,
    pub scheduler: Arc<BillingScheduler>,
    pub control: ControlState,
    pub reading_logs: Option<ReadingLogPipeline>,
    pub repository: Arc<dyn EnergyRepository>,
}

impl Monitor {
    /// `shutdown` ends the reading-log pipeline once its buffer is drained.
    pub async fn build(cfg: &AppConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let repository = build_repository(cfg).await?;
        let notifier = build_notifier(cfg)?;

        let request_timeout = cfg.blynk.request_timeout();
        let blynk = Arc::new(BlynkClient::new(cfg.blynk.base_url.clone(), request_timeout)?);
        let interval = cfg.sampling.interval();
        let energy = Arc::new(
            EnergyFromPower::new(blynk.clone(), interval).with_max_gap(interval + request_timeout),
        );

        let (log_tx, reading_logs) = if cfg.reading_log.enabled {
            let (tx, source) = ChannelSource::new(cfg.reading_log.channel_capacity, shutdown);
            (Some(tx), Some(source))
        } else {
            (None, None)
        };

        let mut accumulators = Vec::with_capacity(cfg.devices.len());
        let mut controlled = HashMap::new();
        let mut by_device: HashMap<i64, Arc<Accumulator>> = HashMap::new();
        for device in &cfg.devices {
            let address = DeviceAddress::new(device.auth_token.clone(), device.power_pin.clone());
            let accumulator = Arc::new(match &log_tx {
                Some(tx) => Accumulator::with_log_sender(
                    device.device_id,
                    address.clone(),
                    energy.clone(),
                    interval,
                    request_timeout,
                    tx.clone(),
                ),
                None => Accumulator::new(
                    device.device_id,
                    address.clone(),
                    energy.clone(),
                    interval,
                    request_timeout,
                ),
            });

            controlled.insert(
                device.device_id,
                ControlledDevice {
                    accumulator: accumulator.clone(),
                    switch_address: address.with_pin(device.switch_pin.clone()),
                    voltage_address: address.with_pin(device.voltage_pin.clone()),
                    current_address: address.with_pin(device.current_pin.clone()),
                    power_address: address,
                },
            );
            by_device.insert(device.device_id, accumulator.clone());
            accumulators.push(accumulator);
        }

        let jobs = cfg
            .devices_by_user()
            .into_iter()
            .map(|(user_id, devices)| BillingJob {
                user_id,
                accumulators: devices
                    .iter()
                    .filter_map(|d| by_device.get(&d.device_id).cloned())
                    .collect(),
            })
            .collect();

        let utc_offset = cfg.billing.utc_offset()?;
        let generator = BillGenerator::new(
            cfg.billing.rate_schedule()?,
            cfg.billing.emission_factor,
            cfg.billing.currency_symbol.clone(),
            repository.clone(),
            notifier.clone(),
        );
        let scheduler = Arc::new(BillingScheduler::new(
            jobs,
            generator,
            Arc::new(SystemClock::new(utc_offset)),
            cfg.billing.hour,
            cfg.billing.check_interval(),
            cfg.billing.reset_after_billing,
        ));

        let control = ControlState::new(
            controlled,
            blynk.clone(),
            blynk,
            repository.clone(),
            request_timeout,
            utc_offset,
        );

        let reading_logs = match reading_logs {
            Some(source) => {
                let targets = alert_targets(cfg, repository.as_ref()).await;
                let transforms: Vec<Arc<dyn Transform<ReadingLog>>> = vec![
                    Arc::new(ReadingLogValidation),
                    Arc::new(PowerLimitAlert::new(
                        targets,
                        notifier,
                        Duration::from_secs(cfg.alerts.cooldown_secs),
                    )),
                ];
                Some(Pipeline {
                    source,
                    transforms,
                    sink: ReadingLogSink::new(
                        repository.clone(),
                        cfg.reading_log.batch_size,
                        cfg.reading_log.max_retries,
                        Duration::from_millis(cfg.reading_log.retry_backoff_ms),
                    ),
                })
            }
            None => None,
        };

        info!(
            devices = accumulators.len(),
            reading_logs = reading_logs.is_some(),
            "monitor assembled"
        );

        Ok(Self {
            accumulators,
            scheduler,
            control,
            reading_logs,
            repository,
        })
    }

    pub async fn start_sampling(&self) {
        for acc in &self.accumulators {
            acc.start().await;
        }
    }

    pub async fn stop_sampling(&self) {
        for acc in &self.accumulators {
            acc.stop().await;
        }
    }
}

/// Power-limit recipients per device, for users that have a limit set.
async fn alert_targets(
    cfg: &AppConfig,
    repository: &dyn EnergyRepository,
) -> HashMap<i64, AlertTarget> {
    let mut targets = HashMap::new();
    for device in &cfg.devices {
        let user = match repository.find_user(&UserLookup::Id(device.user_id)).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(
                    device_id = device.device_id,
                    user_id = device.user_id,
                    "device owner not found"
                );
                continue;
            }
            Err(e) => {
                warn!(
                    device_id = device.device_id,
                    error = %e,
                    "failed to load device owner; alerts disabled"
                );
                continue;
            }
        };
        let Some(limit_w) = user.power_limit_w else {
            continue;
        };
        targets.insert(
            device.device_id,
            AlertTarget {
                user_id: user.id,
                device_name: device.display_name(),
                limit_w,
                email: Some(user.email).filter(|e| !e.is_empty()),
                fcm_token: user.fcm_token.filter(|t| !t.is_empty()),
            },
        );
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [persistence]
        kind = "memory"

        [[devices]]
        device_id = 1
        user_id = 10
        auth_token = "tok-a"

        [[devices]]
        device_id = 2
        user_id = 11
        name = "geyser"
        auth_token = "tok-b"

        [[users]]
        id = 10
        username = "ravi"
        email = "ravi@example.com"

        [[users]]
        id = 11
        username = "neha"
        email = "neha@example.com"
        fcm_token = "fcm-neha"
        power_limit_w = 1500.0
    "#;

    #[tokio::test]
    async fn assembles_one_job_per_user() {
        let cfg = AppConfig::from_toml(CONFIG).unwrap();
        let monitor = Monitor::build(&cfg, CancellationToken::new()).await.unwrap();

        assert_eq!(monitor.accumulators.len(), 2);
        let mut users: Vec<i64> = monitor.scheduler.user_ids().collect();
        users.sort_unstable();
        assert_eq!(users, vec![10, 11]);
        assert!(monitor.reading_logs.is_some());
    }

    #[tokio::test]
    async fn alerts_only_for_users_with_limits() {
        let cfg = AppConfig::from_toml(CONFIG).unwrap();
        let repo = build_repository(&cfg).await.unwrap();

        let targets = alert_targets(&cfg, repo.as_ref()).await;
        assert_eq!(targets.len(), 1);
        let t = &targets[&2];
        assert_eq!(t.device_name, "geyser");
        assert_eq!(t.limit_w, 1500.0);
        assert_eq!(t.fcm_token.as_deref(), Some("fcm-neha"));
    }
}
