//! Per-device energy accumulation.
//!
//! An [`Accumulator`] owns one device's running total and the background
//! task that samples the device and adds each successful reading to it.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use energy_client::domain::ReadingLog;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    pipeline::Envelope,
    sources::{DeviceAddress, SampleError, Sampler},
};

/// Non-negative `f64` total stored as atomic bits.
#[derive(Debug, Default)]
pub struct RunningTotal(AtomicU64);

impl RunningTotal {
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Add `amount` and return the new total.
    pub fn add(&self, amount: f64) -> f64 {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + amount).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(prev) + amount
    }

    /// Replace the total with zero, returning what it held.
    pub fn take(&self) -> f64 {
        f64::from_bits(self.0.swap(0.0_f64.to_bits(), Ordering::AcqRel))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Idle,
    Running,
}

struct SamplingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    device_id: i64,
    address: DeviceAddress,
    sampler: Arc<dyn Sampler>,
    request_timeout: Duration,
    total: RunningTotal,
    active_loops: AtomicUsize,
    log_tx: Option<mpsc::Sender<Envelope<ReadingLog>>>,
}

pub struct Accumulator {
    shared: Arc<Shared>,
    interval: Duration,
    task: Mutex<Option<SamplingTask>>,
}

impl Accumulator {
    pub fn new(
        device_id: i64,
        address: DeviceAddress,
        sampler: Arc<dyn Sampler>,
        interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self::build(device_id, address, sampler, interval, request_timeout, None)
    }

    /// Like [`Accumulator::new`], also offering each successful sample to
    /// the reading-log pipeline.
    pub fn with_log_sender(
        device_id: i64,
        address: DeviceAddress,
        sampler: Arc<dyn Sampler>,
        interval: Duration,
        request_timeout: Duration,
        log_tx: mpsc::Sender<Envelope<ReadingLog>>,
    ) -> Self {
        Self::build(device_id, address, sampler, interval, request_timeout, Some(log_tx))
    }

    fn build(
        device_id: i64,
        address: DeviceAddress,
        sampler: Arc<dyn Sampler>,
        interval: Duration,
        request_timeout: Duration,
        log_tx: Option<mpsc::Sender<Envelope<ReadingLog>>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                device_id,
                address,
                sampler,
                request_timeout,
                total: RunningTotal::default(),
                active_loops: AtomicUsize::new(0),
                log_tx,
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> i64 {
        self.shared.device_id
    }

    /// Spawn the sampling loop. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut slot = self.task.lock().await;
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!(device_id = self.shared.device_id, "accumulation already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(
            self.shared.clone(),
            self.interval,
            cancel.clone(),
        ));
        *slot = Some(SamplingTask { cancel, handle });
        info!(
            device_id = self.shared.device_id,
            interval_ms = self.interval.as_millis() as u64,
            "energy accumulation started"
        );
    }

    /// Stop the sampling loop and wait until it has exited.
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        let Some(task) = slot.take() else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(device_id = self.shared.device_id, error = %e, "sampling task ended abnormally");
        }
        info!(
            device_id = self.shared.device_id,
            total_kwh = self.get_total(),
            "energy accumulation stopped"
        );
    }

    pub async fn state(&self) -> AccumulatorState {
        match self.task.lock().await.as_ref() {
            Some(t) if !t.handle.is_finished() => AccumulatorState::Running,
            _ => AccumulatorState::Idle,
        }
    }

    /// Number of sampling loops currently executing for this device.
    pub fn active_loops(&self) -> usize {
        self.shared.active_loops.load(Ordering::Acquire)
    }

    pub fn get_total(&self) -> f64 {
        self.shared.total.get()
    }

    pub fn reset_total(&self) {
        let previous = self.shared.total.take();
        info!(device_id = self.shared.device_id, previous_kwh = previous, "total energy reset");
        publish_total(self.shared.device_id, 0.0);
    }

    /// Atomically read and zero the total, for closing a billing period.
    pub fn take_total(&self) -> f64 {
        let taken = self.shared.total.take();
        publish_total(self.shared.device_id, 0.0);
        taken
    }

    /// Return energy previously removed with [`Accumulator::take_total`].
    pub fn credit(&self, kwh: f64) {
        if kwh > 0.0 && kwh.is_finite() {
            let total = self.shared.total.add(kwh);
            publish_total(self.shared.device_id, total);
        }
    }

    /// Run one sampling tick. Returns the new total, or `None` if the tick
    /// was skipped.
    pub async fn sample_once(&self) -> Option<f64> {
        sample_tick(&self.shared).await
    }
}

struct LoopGuard<'a>(&'a AtomicUsize);

impl<'a> LoopGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn sampling_loop(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    let _guard = LoopGuard::enter(&shared.active_loops);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // A sample in flight when stop() is called is abandoned.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sample_tick(&shared) => {}
        }
    }
}

async fn sample_tick(shared: &Shared) -> Option<f64> {
    let started = Instant::now();
    let fetch = shared.sampler.fetch(&shared.address);
    let result = match tokio::time::timeout(shared.request_timeout, fetch).await {
        Ok(r) => r,
        Err(_) => Err(SampleError::Timeout),
    };
    metrics::histogram!("blynk_sample_latency_seconds").record(started.elapsed().as_secs_f64());

    let reading = match result {
        Ok(r) if r.value.is_finite() && r.value >= 0.0 => r,
        Ok(r) => {
            let e = SampleError::BadResponse(format!("invalid energy value {}", r.value));
            record_failure(shared, &e);
            return None;
        }
        Err(e) => {
            record_failure(shared, &e);
            return None;
        }
    };

    let total = shared.total.add(reading.value);
    metrics::counter!("blynk_samples_total").increment(1);
    publish_total(shared.device_id, total);
    debug!(
        device_id = shared.device_id,
        increment_kwh = reading.value,
        total_kwh = total,
        "accumulated sample"
    );

    if let Some(tx) = &shared.log_tx {
        let log = ReadingLog {
            ts: reading.ts,
            device_id: shared.device_id,
            power_w: reading.power_w,
            energy_kwh: reading.value,
            cumulative_energy_kwh: total,
        };
        if tx.try_send(Envelope::now(log)).is_err() {
            metrics::counter!("reading_log_dropped_total").increment(1);
        }
    }

    Some(total)
}

fn record_failure(shared: &Shared, e: &SampleError) {
    metrics::counter!("blynk_sample_failures_total", "reason" => e.reason()).increment(1);
    warn!(device_id = shared.device_id, error = %e, "sample skipped");
}

fn publish_total(device_id: i64, total: f64) {
    metrics::gauge!("device_energy_total_kwh", "device_id" => device_id.to_string()).set(total);
}
