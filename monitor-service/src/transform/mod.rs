use std::{collections::HashMap, sync::Arc, time::Duration};

use energy_client::domain::ReadingLog;
use time::macros::datetime;
use tokio::{sync::Mutex, time::Instant};
use tracing::{info, warn};

use crate::{
    advice::PowerLevel,
    notify::Notifier,
    pipeline::{Envelope, PipelineError, Transform},
};

/// Pure validation of a `ReadingLog` record.
///
/// Rules:
/// - energy and cumulative energy must be non-negative.
/// - power, when present, must be non-negative.
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_reading_log(
    env: Envelope<ReadingLog>,
) -> Result<Envelope<ReadingLog>, PipelineError> {
    let r = &env.payload;

    if !non_negative(r.energy_kwh) || !non_negative(r.cumulative_energy_kwh) {
        return Err(PipelineError::Rejected("energy must be non-negative".to_string()));
    }

    if r.power_w.is_some_and(|p| !non_negative(p)) {
        return Err(PipelineError::Rejected("power must be non-negative".to_string()));
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if r.ts < min_ts || r.ts > max_ts {
        return Err(PipelineError::Rejected("timestamp out of allowed range".to_string()));
    }

    Ok(env)
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

#[derive(Clone, Default)]
pub struct ReadingLogValidation;

#[async_trait::async_trait]
impl Transform<ReadingLog> for ReadingLogValidation {
    async fn apply(
        &self,
        input: Envelope<ReadingLog>,
    ) -> Result<Envelope<ReadingLog>, PipelineError> {
        validate_reading_log(input).inspect_err(|_| {
            metrics::counter!("reading_log_rejected_total").increment(1);
        })
    }
}

/// Who to warn when a device draws more than its owner's limit.
#[derive(Debug, Clone)]
pub struct AlertTarget {
    pub user_id: i64,
    pub device_name: String,
    pub limit_w: f64,
    pub email: Option<String>,
    pub fcm_token: Option<String>,
}

/// Pass-through stage that raises power-limit alerts.
///
/// Alerts for a device are sent at most once per `cooldown`. A push goes out
/// on every alert; an email only when the draw is high or critical.
pub struct PowerLimitAlert {
    targets: HashMap<i64, AlertTarget>,
    notifier: Arc<dyn Notifier>,
    cooldown: Duration,
    last_alert: Mutex<HashMap<i64, Instant>>,
}

impl PowerLimitAlert {
    pub fn new(
        targets: HashMap<i64, AlertTarget>,
        notifier: Arc<dyn Notifier>,
        cooldown: Duration,
    ) -> Self {
        Self {
            targets,
            notifier,
            cooldown,
            last_alert: Mutex::new(HashMap::new()),
        }
    }

    async fn claim_slot(&self, device_id: i64) -> bool {
        let mut last = self.last_alert.lock().await;
        let now = Instant::now();
        match last.get(&device_id) {
            Some(at) if now.duration_since(*at) < self.cooldown => false,
            _ => {
                last.insert(device_id, now);
                true
            }
        }
    }

    async fn alert(&self, target: &AlertTarget, device_id: i64, watts: f64) {
        let level = PowerLevel::classify(watts);
        let title = "Power Limit Exceeded";
        let body = format!(
            "{} is drawing {watts:.0} W, above your limit of {:.0} W. {}",
            target.device_name,
            target.limit_w,
            level.advice()
        );

        metrics::counter!("power_limit_alerts_total").increment(1);
        info!(
            device_id,
            user_id = target.user_id,
            watts,
            limit_w = target.limit_w,
            ?level,
            "power limit exceeded"
        );

        if let Some(token) = &target.fcm_token {
            if let Err(e) = self.notifier.send_push(token, title, &body).await {
                metrics::counter!("notification_failures_total", "channel" => "push").increment(1);
                warn!(device_id, error = %e, "failed to push power alert");
            }
        }

        if level.is_alarming() {
            if let Some(email) = &target.email {
                let subject = format!("ALERT: {level:?} Power Usage Detected");
                let html = format!("<p>{body}</p>");
                if let Err(e) = self.notifier.send_email(email, &subject, &html).await {
                    metrics::counter!("notification_failures_total", "channel" => "email")
                        .increment(1);
                    warn!(device_id, error = %e, "failed to email power alert");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transform<ReadingLog> for PowerLimitAlert {
    async fn apply(
        &self,
        input: Envelope<ReadingLog>,
    ) -> Result<Envelope<ReadingLog>, PipelineError> {
        let device_id = input.payload.device_id;
        if let (Some(watts), Some(target)) = (input.payload.power_w, self.targets.get(&device_id)) {
            if watts > target.limit_w && self.claim_slot(device_id).await {
                self.alert(target, device_id, watts).await;
            }
        }
        Ok(input)
    }
}
