//! Daily billing trigger.
//!
//! The scheduler polls the wall clock on a fixed cadence and bills each user
//! once per calendar day during the configured hour.

use std::{collections::HashMap, sync::Arc, time::Duration};

use time::{Date, OffsetDateTime, UtcOffset};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    accumulator::Accumulator,
    billing::{BillGenerator, BillingError, BillingOutcome},
    store::UserLookup,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock shifted to the deployment's local offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// One user's devices, billed together.
pub struct BillingJob {
    pub user_id: i64,
    pub accumulators: Vec<Arc<Accumulator>>,
}

impl BillingJob {
    /// Collect the period's energy. With `take` the totals are zeroed and
    /// the per-device amounts are returned for [`BillingJob::credit_back`].
    fn collect(&self, take: bool) -> (f64, Vec<f64>) {
        let parts: Vec<f64> = self
            .accumulators
            .iter()
            .map(|a| if take { a.take_total() } else { a.get_total() })
            .collect();
        (parts.iter().sum(), parts)
    }

    fn credit_back(&self, parts: &[f64]) {
        for (acc, kwh) in self.accumulators.iter().zip(parts) {
            acc.credit(*kwh);
        }
    }
}

pub struct BillingScheduler {
    jobs: Vec<BillingJob>,
    generator: BillGenerator,
    clock: Arc<dyn Clock>,
    billing_hour: u8,
    check_interval: Duration,
    reset_after_billing: bool,
    watermark: Mutex<HashMap<i64, Date>>,
}

impl BillingScheduler {
    pub fn new(
        jobs: Vec<BillingJob>,
        generator: BillGenerator,
        clock: Arc<dyn Clock>,
        billing_hour: u8,
        check_interval: Duration,
        reset_after_billing: bool,
    ) -> Self {
        Self {
            jobs,
            generator,
            clock,
            billing_hour,
            check_interval,
            reset_after_billing,
            watermark: Mutex::new(HashMap::new()),
        }
    }

    /// Last date each user was billed by this process.
    pub async fn watermark(&self, user_id: i64) -> Option<Date> {
        self.watermark.lock().await.get(&user_id).copied()
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            billing_hour = self.billing_hour,
            check_interval_secs = self.check_interval.as_secs(),
            users = self.jobs.len(),
            "billing scheduler started"
        );
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.check_once().await;
        }
        info!("billing scheduler stopped");
    }

    /// Bill every user that is due. Returns how many bills were created.
    pub async fn check_once(&self) -> usize {
        let now = self.clock.now();
        if now.hour() != self.billing_hour {
            return 0;
        }

        let today = now.date();
        let mut created = 0;
        for job in &self.jobs {
            if self.watermark(job.user_id).await == Some(today) {
                continue;
            }
            match self.run_cycle(job, now).await {
                Ok(outcome) => {
                    if matches!(outcome, BillingOutcome::Created(_)) {
                        created += 1;
                    }
                    self.watermark.lock().await.insert(job.user_id, today);
                }
                Err(e) => {
                    metrics::counter!("billing_failures_total").increment(1);
                    error!(
                        user_id = job.user_id,
                        error = %e,
                        "billing cycle failed, will retry on next check"
                    );
                }
            }
        }
        created
    }

    /// Bill one user immediately, ignoring the billing hour.
    pub async fn bill_now(&self, user_id: i64) -> Result<BillingOutcome, BillingError> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.user_id == user_id)
            .ok_or(BillingError::UnknownUser(user_id))?;

        let now = self.clock.now();
        let outcome = self.run_cycle(job, now).await?;
        self.watermark.lock().await.insert(user_id, now.date());
        Ok(outcome)
    }

    /// [`BillingScheduler::bill_now`] for the user registered under `email`.
    pub async fn bill_by_email(&self, email: &str) -> Result<BillingOutcome, BillingError> {
        let user = self
            .generator
            .repository()
            .find_user(&UserLookup::Email(email.to_string()))
            .await?
            .ok_or_else(|| BillingError::UnknownEmail(email.to_string()))?;
        self.bill_now(user.id).await
    }

    pub fn user_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.jobs.iter().map(|j| j.user_id)
    }

    async fn run_cycle(
        &self,
        job: &BillingJob,
        now: OffsetDateTime,
    ) -> Result<BillingOutcome, BillingError> {
        let user = self
            .generator
            .repository()
            .find_user(&UserLookup::Id(job.user_id))
            .await?
            .ok_or(BillingError::UnknownUser(job.user_id))?;

        let (energy_kwh, parts) = job.collect(self.reset_after_billing);
        let result = self.generator.generate(&user, energy_kwh, now).await;

        // Energy that did not end up on a new bill rolls into the next period.
        if self.reset_after_billing && !matches!(result, Ok(BillingOutcome::Created(_))) {
            job.credit_back(&parts);
            if let Err(e) = &result {
                warn!(
                    user_id = job.user_id,
                    energy_kwh,
                    error = %e,
                    "restored energy after failed billing"
                );
            }
        }
        result
    }
}
