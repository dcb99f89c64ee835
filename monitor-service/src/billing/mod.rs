//! Turns an energy total into a persisted bill and a user notification.

use std::sync::Arc;

use energy_client::domain::{Bill, NewBill, User};
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

use crate::{
    notify::{report::BillReport, Notifier},
    rates::{RateError, RateSchedule},
    store::{EnergyRepository, RepositoryError},
};

/// kg CO2-equivalent per kWh of grid electricity.
pub const DEFAULT_EMISSION_FACTOR: f64 = 0.82;

#[derive(thiserror::Error, Debug)]
pub enum BillingError {
    #[error(transparent)]
    Rate(#[from] RateError),
    #[error("failed to persist bill: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("user {0} not found")]
    UnknownUser(i64),
    #[error("no user with email {0}")]
    UnknownEmail(String),
}

#[derive(Debug, Clone)]
pub enum BillingOutcome {
    Created(Bill),
    AlreadyBilled { bill_date: Date },
}

pub struct BillGenerator {
    schedule: RateSchedule,
    emission_factor: f64,
    currency: String,
    repository: Arc<dyn EnergyRepository>,
    notifier: Arc<dyn Notifier>,
}

impl BillGenerator {
    pub fn new(
        schedule: RateSchedule,
        emission_factor: f64,
        currency: impl Into<String>,
        repository: Arc<dyn EnergyRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            schedule,
            emission_factor,
            currency: currency.into(),
            repository,
            notifier,
        }
    }

    pub fn repository(&self) -> &Arc<dyn EnergyRepository> {
        &self.repository
    }

    /// Price `energy_kwh`, store the bill for `as_of`'s date, then notify.
    ///
    /// The bill is written before any notification is attempted, and
    /// notification failures never fail the call.
    pub async fn generate(
        &self,
        user: &User,
        energy_kwh: f64,
        as_of: OffsetDateTime,
    ) -> Result<BillingOutcome, BillingError> {
        let breakdown = self.schedule.compute_cost(energy_kwh)?;
        let bill_date = as_of.date();

        let new_bill = NewBill {
            user_id: user.id,
            bill_date,
            total_energy_kwh: energy_kwh,
            total_cost: breakdown.total_cost,
            co2_emission_kg: energy_kwh * self.emission_factor,
            cost_breakdown: breakdown.charges,
        };

        let Some(bill) = self.repository.save_bill(&new_bill).await? else {
            metrics::counter!("bills_duplicate_total").increment(1);
            info!(user_id = user.id, %bill_date, "bill already exists for this date");
            return Ok(BillingOutcome::AlreadyBilled { bill_date });
        };

        metrics::counter!("bills_generated_total").increment(1);
        info!(
            user_id = user.id,
            bill_id = bill.id,
            %bill_date,
            total_energy_kwh = bill.total_energy_kwh,
            total_cost = bill.total_cost,
            "bill saved"
        );

        self.notify(user, &bill).await;
        Ok(BillingOutcome::Created(bill))
    }

    async fn notify(&self, user: &User, bill: &Bill) {
        let report = BillReport::render(bill, &self.currency);

        if !user.email.is_empty() {
            let sent = self
                .notifier
                .send_email(&user.email, &report.subject, &report.html)
                .await;
            if let Err(e) = sent {
                metrics::counter!("notification_failures_total", "channel" => "email").increment(1);
                warn!(user_id = user.id, error = %e, "failed to email bill report");
            }
        }

        if let Some(token) = user.fcm_token.as_deref().filter(|t| !t.is_empty()) {
            let sent = self
                .notifier
                .send_push(token, &report.push_title, &report.push_body)
                .await;
            if let Err(e) = sent {
                metrics::counter!("notification_failures_total", "channel" => "push").increment(1);
                warn!(user_id = user.id, error = %e, "failed to push bill report");
            }
        }
    }
}
