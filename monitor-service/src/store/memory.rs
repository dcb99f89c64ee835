use std::sync::{
    atomic::{AtomicI64, Ordering},
    Mutex, MutexGuard,
};

use energy_client::domain::{Bill, NewBill, ReadingLog, User};
use sqlx::types::Json;
use time::OffsetDateTime;

use super::{EnergyRepository, RepositoryError, UserLookup};

#[derive(Default)]
struct State {
    users: Vec<User>,
    bills: Vec<Bill>,
    reading_logs: Vec<ReadingLog>,
}

/// Process-local repository for running without a database.
///
/// Enforces the same `(user_id, bill_date)` uniqueness as the Postgres
/// schema. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    next_bill_id: AtomicI64,
}

impl InMemoryRepository {
    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            state: Mutex::new(State {
                users,
                ..State::default()
            }),
            next_bill_id: AtomicI64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("in-memory repository lock poisoned".into()))
    }

    pub fn bills(&self) -> Vec<Bill> {
        self.lock().map(|s| s.bills.clone()).unwrap_or_default()
    }

    pub fn reading_logs(&self) -> Vec<ReadingLog> {
        self.lock().map(|s| s.reading_logs.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl EnergyRepository for InMemoryRepository {
    async fn save_bill(&self, bill: &NewBill) -> Result<Option<Bill>, RepositoryError> {
        let mut state = self.lock()?;
        if state
            .bills
            .iter()
            .any(|b| b.user_id == bill.user_id && b.bill_date == bill.bill_date)
        {
            return Ok(None);
        }

        let saved = Bill {
            id: self.next_bill_id.fetch_add(1, Ordering::Relaxed) + 1,
            user_id: bill.user_id,
            bill_date: bill.bill_date,
            total_energy_kwh: bill.total_energy_kwh,
            total_cost: bill.total_cost,
            co2_emission_kg: bill.co2_emission_kg,
            cost_breakdown: Json(bill.cost_breakdown.clone()),
            created_at: OffsetDateTime::now_utc(),
        };
        state.bills.push(saved.clone());
        Ok(Some(saved))
    }

    async fn find_user(&self, lookup: &UserLookup) -> Result<Option<User>, RepositoryError> {
        let state = self.lock()?;
        let found = state.users.iter().find(|u| match lookup {
            UserLookup::Id(id) => u.id == *id,
            UserLookup::Email(email) => u.email.eq_ignore_ascii_case(email),
        });
        Ok(found.cloned())
    }

    async fn bills_for_user(&self, user_id: i64) -> Result<Vec<Bill>, RepositoryError> {
        let state = self.lock()?;
        let mut bills: Vec<Bill> = state
            .bills
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bills.sort_by(|a, b| b.bill_date.cmp(&a.bill_date));
        Ok(bills)
    }

    async fn append_reading_logs(&self, logs: &[ReadingLog]) -> Result<u64, RepositoryError> {
        let mut state = self.lock()?;
        state.reading_logs.extend_from_slice(logs);
        Ok(logs.len() as u64)
    }

    async fn reading_logs_for_device(
        &self,
        device_id: i64,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingLog>, RepositoryError> {
        let state = self.lock()?;
        let mut logs: Vec<ReadingLog> = state
            .reading_logs
            .iter()
            .filter(|l| l.device_id == device_id && l.ts >= start && l.ts < end)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.ts);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn user(id: i64, email: &str) -> User {
        User {
            id,
            username: format!("user{id}"),
            email: email.into(),
            fcm_token: None,
            power_limit_w: None,
        }
    }

    fn new_bill(user_id: i64, day: time::Date) -> NewBill {
        NewBill {
            user_id,
            bill_date: day,
            total_energy_kwh: 3.0,
            total_cost: 0.0,
            co2_emission_kg: 2.46,
            cost_breakdown: vec![],
        }
    }

    #[tokio::test]
    async fn second_bill_for_same_day_is_refused() {
        let repo = InMemoryRepository::default();
        let first = repo.save_bill(&new_bill(1, date!(2024 - 03 - 01))).await.unwrap();
        let dup = repo.save_bill(&new_bill(1, date!(2024 - 03 - 01))).await.unwrap();
        let next_day = repo.save_bill(&new_bill(1, date!(2024 - 03 - 02))).await.unwrap();

        assert_eq!(first.map(|b| b.id), Some(1));
        assert!(dup.is_none());
        assert!(next_day.is_some());
        assert_eq!(repo.bills().len(), 2);
    }

    #[tokio::test]
    async fn bills_are_listed_newest_first() {
        let repo = InMemoryRepository::default();
        repo.save_bill(&new_bill(1, date!(2024 - 03 - 01))).await.unwrap();
        repo.save_bill(&new_bill(1, date!(2024 - 03 - 03))).await.unwrap();
        repo.save_bill(&new_bill(2, date!(2024 - 03 - 02))).await.unwrap();

        let bills = repo.bills_for_user(1).await.unwrap();
        let dates: Vec<_> = bills.iter().map(|b| b.bill_date).collect();
        assert_eq!(dates, vec![date!(2024 - 03 - 03), date!(2024 - 03 - 01)]);
    }

    #[tokio::test]
    async fn finds_users_by_id_and_email() {
        let users = vec![user(1, "a@example.com"), user(2, "b@example.com")];
        let repo = InMemoryRepository::with_users(users);
        let by_id = repo.find_user(&UserLookup::Id(2)).await.unwrap();
        let by_email = repo.find_user(&UserLookup::Email("A@example.com".into())).await.unwrap();
        assert_eq!(by_id.map(|u| u.id), Some(2));
        assert_eq!(by_email.map(|u| u.id), Some(1));
        assert!(repo.find_user(&UserLookup::Id(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reading_logs_are_filtered_by_device_and_window() {
        let repo = InMemoryRepository::default();
        let log = |device_id, ts| ReadingLog {
            ts,
            device_id,
            power_w: Some(100.0),
            energy_kwh: 0.1,
            cumulative_energy_kwh: 0.1,
        };
        repo.append_reading_logs(&[
            log(1, datetime!(2024-03-01 10:30 UTC)),
            log(1, datetime!(2024-03-01 09:00 UTC)),
            log(2, datetime!(2024-03-01 09:30 UTC)),
            log(1, datetime!(2024-03-01 11:00 UTC)),
        ])
        .await
        .unwrap();

        let logs = repo
            .reading_logs_for_device(
                1,
                datetime!(2024-03-01 09:00 UTC),
                datetime!(2024-03-01 11:00 UTC),
            )
            .await
            .unwrap();
        let times: Vec<_> = logs.iter().map(|l| l.ts).collect();
        assert_eq!(
            times,
            vec![datetime!(2024-03-01 09:00 UTC), datetime!(2024-03-01 10:30 UTC)]
        );
    }
}
