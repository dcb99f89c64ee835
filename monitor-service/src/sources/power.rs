use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

use super::{DeviceAddress, Reading, SampleError, Sampler};

const WATT_SECONDS_PER_KWH: f64 = 3_600_000.0;

/// Turns an instantaneous power pin (watts) into energy (kWh) by holding the
/// power constant since the previous good reading from the same address.
///
/// The first reading from an address counts as one interval. Later readings
/// count the real elapsed time, capped at `max_gap` so an outage is not
/// billed as constant draw.
pub struct EnergyFromPower<S> {
    inner: S,
    interval: Duration,
    max_gap: Duration,
    last_sample: Mutex<HashMap<DeviceAddress, Instant>>,
}

impl<S> EnergyFromPower<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            max_gap: interval,
            last_sample: Mutex::new(HashMap::new()),
        }
    }

    /// Never below the sampling interval.
    pub fn with_max_gap(mut self, max_gap: Duration) -> Self {
        self.max_gap = max_gap.max(self.interval);
        self
    }

    pub fn kwh_for(watts: f64, elapsed: Duration) -> f64 {
        watts * elapsed.as_secs_f64() / WATT_SECONDS_PER_KWH
    }

    fn elapsed_since_last(&self, address: &DeviceAddress, now: Instant) -> Duration {
        let mut last = self.last_sample.lock().unwrap_or_else(PoisonError::into_inner);
        let span = match last.insert(address.clone(), now) {
            Some(prev) => now.saturating_duration_since(prev),
            None => self.interval,
        };
        span.min(self.max_gap)
    }
}

#[async_trait::async_trait]
impl<S: Sampler> Sampler for EnergyFromPower<S> {
    async fn fetch(&self, address: &DeviceAddress) -> Result<Reading, SampleError> {
        let raw = self.inner.fetch(address).await?;
        let watts = raw.value;
        if !watts.is_finite() || watts < 0.0 {
            return Err(SampleError::BadResponse(format!("invalid power reading {watts} W")));
        }

        let elapsed = self.elapsed_since_last(address, Instant::now());
        Ok(Reading {
            ts: raw.ts,
            value: Self::kwh_for(watts, elapsed),
            power_w: Some(watts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    struct Fixed(f64);

    #[async_trait::async_trait]
    impl Sampler for Fixed {
        async fn fetch(&self, _address: &DeviceAddress) -> Result<Reading, SampleError> {
            Ok(Reading {
                ts: OffsetDateTime::now_utc(),
                value: self.0,
                power_w: None,
            })
        }
    }

    /// Answers with a fixed wattage after `delay`.
    struct Slow {
        watts: f64,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Sampler for Slow {
        async fn fetch(&self, _address: &DeviceAddress) -> Result<Reading, SampleError> {
            tokio::time::sleep(self.delay).await;
            Ok(Reading {
                ts: OffsetDateTime::now_utc(),
                value: self.watts,
                power_w: None,
            })
        }
    }

    fn secs_at_1kw(kwh: f64) -> f64 {
        kwh * WATT_SECONDS_PER_KWH / 1000.0
    }

    #[tokio::test]
    async fn one_kilowatt_for_an_hour_of_seconds() {
        let sampler = EnergyFromPower::new(Fixed(1000.0), Duration::from_secs(1));
        let reading = sampler.fetch(&DeviceAddress::new("t", "V2")).await.unwrap();
        assert_eq!(reading.power_w, Some(1000.0));
        assert!((reading.value * 3600.0 - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn negative_power_is_rejected() {
        let sampler = EnergyFromPower::new(Fixed(-5.0), Duration::from_secs(1));
        let err = sampler.fetch(&DeviceAddress::new("t", "V2")).await.unwrap_err();
        assert!(matches!(err, SampleError::BadResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reads_are_credited_for_the_real_elapsed_time() {
        let slow = Slow {
            watts: 1000.0,
            delay: Duration::from_millis(2500),
        };
        let sampler =
            EnergyFromPower::new(slow, Duration::from_secs(1)).with_max_gap(Duration::from_secs(4));
        let address = DeviceAddress::new("t", "V2");

        let mut credited = Vec::new();
        for _ in 0..4 {
            credited.push(secs_at_1kw(sampler.fetch(&address).await.unwrap().value));
        }

        let expected = [1.0, 2.5, 2.5, 2.5];
        for (got, want) in credited.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "credited {got}s, expected {want}s");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn long_gaps_are_capped() {
        let sampler = EnergyFromPower::new(Fixed(1000.0), Duration::from_secs(1))
            .with_max_gap(Duration::from_secs(4));
        let address = DeviceAddress::new("t", "V2");

        sampler.fetch(&address).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        let reading = sampler.fetch(&address).await.unwrap();

        assert!((secs_at_1kw(reading.value) - 4.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn addresses_are_tracked_separately() {
        let sampler = EnergyFromPower::new(Fixed(1000.0), Duration::from_secs(1))
            .with_max_gap(Duration::from_secs(10));
        let a = DeviceAddress::new("a", "V2");
        let b = DeviceAddress::new("b", "V2");

        sampler.fetch(&a).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let first_b = sampler.fetch(&b).await.unwrap();
        let second_a = sampler.fetch(&a).await.unwrap();

        assert!((secs_at_1kw(first_b.value) - 1.0).abs() < 1e-9);
        assert!((secs_at_1kw(second_a.value) - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reads_do_not_move_the_watermark() {
        let sampler = EnergyFromPower::new(Fixed(-1.0), Duration::from_secs(1))
            .with_max_gap(Duration::from_secs(10));
        let address = DeviceAddress::new("t", "V2");

        assert!(sampler.fetch(&address).await.is_err());
        assert!(sampler.last_sample.lock().unwrap().is_empty());
    }
}
