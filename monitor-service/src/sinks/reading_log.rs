use std::{sync::Arc, time::Duration};

use energy_client::domain::ReadingLog;
use futures::StreamExt;

use crate::{
    pipeline::{Envelope, PipelineError, Sink},
    store::{EnergyRepository, RepositoryError},
};

/// Batches reading logs and appends them through the repository.
pub struct ReadingLogSink {
    repository: Arc<dyn EnergyRepository>,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ReadingLogSink {
    pub fn new(
        repository: Arc<dyn EnergyRepository>,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            repository,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    async fn flush_batch(&self, batch: &[Envelope<ReadingLog>]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        let rows: Vec<ReadingLog> = batch.iter().map(|e| e.payload.clone()).collect();

        let mut attempt: u32 = 0;
        loop {
            match self.insert_batch(&rows).await {
                Ok(written) => {
                    metrics::counter!("reading_log_written_total").increment(written);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        let now = std::time::SystemTime::now();
                        if let Ok(dur) = now.duration_since(min_received) {
                            metrics::histogram!("reading_log_end_to_end_latency_seconds")
                                .record(dur.as_secs_f64());
                        }
                    }

                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "reading log flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        rows = rows.len(),
                        "reading log flush failed, giving up"
                    );
                    metrics::counter!("reading_log_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }

    async fn insert_batch(&self, rows: &[ReadingLog]) -> Result<u64, RepositoryError> {
        self.repository.append_reading_logs(rows).await
    }
}

#[async_trait::async_trait]
impl Sink<ReadingLog> for ReadingLogSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<ReadingLog>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        let mut buffer: Vec<Envelope<ReadingLog>> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping reading log");
                    continue;
                }
            };

            buffer.push(env);
            if buffer.len() >= self.batch_size {
                self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            self.flush_batch(&buffer).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use energy_client::domain::{Bill, NewBill, User};
    use time::{macros::datetime, OffsetDateTime};

    use super::*;
    use crate::store::{InMemoryRepository, UserLookup};

    fn log(device_id: i64, energy_kwh: f64) -> Envelope<ReadingLog> {
        Envelope::now(ReadingLog {
            ts: datetime!(2024-03-01 10:00:00 UTC),
            device_id,
            power_w: Some(120.0),
            energy_kwh,
            cumulative_energy_kwh: energy_kwh,
        })
    }

    /// Fails the first `failures` appends, then delegates.
    struct FlakyLogs {
        inner: InMemoryRepository,
        failures: AtomicU32,
    }

    #[async_trait::async_trait]
    impl EnergyRepository for FlakyLogs {
        async fn save_bill(&self, bill: &NewBill) -> Result<Option<Bill>, RepositoryError> {
            self.inner.save_bill(bill).await
        }

        async fn find_user(&self, lookup: &UserLookup) -> Result<Option<User>, RepositoryError> {
            self.inner.find_user(lookup).await
        }

        async fn bills_for_user(&self, user_id: i64) -> Result<Vec<Bill>, RepositoryError> {
            self.inner.bills_for_user(user_id).await
        }

        async fn append_reading_logs(&self, logs: &[ReadingLog]) -> Result<u64, RepositoryError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(RepositoryError::Unavailable("connection reset".into()));
            }
            self.inner.append_reading_logs(logs).await
        }

        async fn reading_logs_for_device(
            &self,
            device_id: i64,
            start: OffsetDateTime,
            end: OffsetDateTime,
        ) -> Result<Vec<ReadingLog>, RepositoryError> {
            self.inner.reading_logs_for_device(device_id, start, end).await
        }
    }

    #[tokio::test]
    async fn writes_in_batches_and_flushes_the_tail() {
        let repo = Arc::new(InMemoryRepository::default());
        let sink = ReadingLogSink::new(repo.clone(), 2, 0, Duration::ZERO);

        let items = vec![
            Ok(log(1, 0.1)),
            Ok(log(1, 0.2)),
            Err(PipelineError::Rejected("negative".into())),
            Ok(log(2, 0.3)),
        ];
        sink.run(futures::stream::iter(items)).await.unwrap();

        let stored = repo.reading_logs();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2].device_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let repo = Arc::new(FlakyLogs {
            inner: InMemoryRepository::default(),
            failures: AtomicU32::new(2),
        });
        let sink = ReadingLogSink::new(repo.clone(), 10, 3, Duration::from_millis(50));

        sink.run(futures::stream::iter(vec![Ok(log(1, 0.5))])).await.unwrap();
        assert_eq!(repo.inner.reading_logs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let repo = Arc::new(FlakyLogs {
            inner: InMemoryRepository::default(),
            failures: AtomicU32::new(5),
        });
        let sink = ReadingLogSink::new(repo.clone(), 10, 1, Duration::from_millis(50));

        let err = sink.run(futures::stream::iter(vec![Ok(log(1, 0.5))])).await.unwrap_err();
        assert!(matches!(err, PipelineError::Sink(_)));
        assert!(repo.inner.reading_logs().is_empty());
    }
}
