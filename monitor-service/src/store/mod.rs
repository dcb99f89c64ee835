//! Persistence boundary for bills, users and reading logs.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PgRepository;

use energy_client::domain::{Bill, NewBill, ReadingLog, User};
use time::OffsetDateTime;

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(i64),
    Email(String),
}

#[async_trait::async_trait]
pub trait EnergyRepository: Send + Sync {
    /// Insert the bill unless `(user_id, bill_date)` is already billed.
    /// `Ok(None)` means a bill for that day already exists.
    async fn save_bill(&self, bill: &NewBill) -> Result<Option<Bill>, RepositoryError>;

    async fn find_user(&self, lookup: &UserLookup) -> Result<Option<User>, RepositoryError>;

    async fn bills_for_user(&self, user_id: i64) -> Result<Vec<Bill>, RepositoryError>;

    async fn append_reading_logs(&self, logs: &[ReadingLog]) -> Result<u64, RepositoryError>;

    /// A device's logs with `start <= ts < end`, oldest first.
    async fn reading_logs_for_device(
        &self,
        device_id: i64,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingLog>, RepositoryError>;
}
