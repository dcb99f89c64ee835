use energy_client::{
    db::{bill_queries, reading_log_queries, user_queries},
    domain::{Bill, NewBill, ReadingLog, User},
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;

use super::{EnergyRepository, RepositoryError, UserLookup};

/// Repository over the application's Postgres database.
///
/// Expects the tables from `sql/schema/01_energy.sql`, applied out-of-band.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: anyhow::Error) -> RepositoryError {
    RepositoryError::Database(format!("{e:#}"))
}

#[async_trait::async_trait]
impl EnergyRepository for PgRepository {
    async fn save_bill(&self, bill: &NewBill) -> Result<Option<Bill>, RepositoryError> {
        bill_queries::insert_bill_if_absent(&self.pool, bill)
            .await
            .map_err(db_err)
    }

    async fn find_user(&self, lookup: &UserLookup) -> Result<Option<User>, RepositoryError> {
        match lookup {
            UserLookup::Id(id) => user_queries::find_user_by_id(&self.pool, *id).await,
            UserLookup::Email(email) => user_queries::find_user_by_email(&self.pool, email).await,
        }
        .map_err(db_err)
    }

    async fn bills_for_user(&self, user_id: i64) -> Result<Vec<Bill>, RepositoryError> {
        bill_queries::bills_for_user(&self.pool, user_id)
            .await
            .map_err(db_err)
    }

    async fn append_reading_logs(&self, logs: &[ReadingLog]) -> Result<u64, RepositoryError> {
        reading_log_queries::insert_reading_logs(&self.pool, logs)
            .await
            .map_err(db_err)
    }

    async fn reading_logs_for_device(
        &self,
        device_id: i64,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingLog>, RepositoryError> {
        reading_log_queries::reading_logs_for_device(&self.pool, device_id, start, end)
            .await
            .map_err(db_err)
    }
}
