//! Average power and energy per hour or per day over a recent window.

use std::collections::BTreeMap;

use energy_client::domain::ReadingLog;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsagePeriod {
    /// Last 24 hours, one bucket per hour.
    #[default]
    Hourly,
    /// Last 7 days, one bucket per day.
    Weekly,
    /// Last 30 days, one bucket per day.
    Monthly,
}

impl UsagePeriod {
    pub fn window(self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(24),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(30),
        }
    }

    fn label(self, ts: OffsetDateTime) -> String {
        match self {
            Self::Hourly => format!("{} {:02}:00", ts.date(), ts.hour()),
            Self::Weekly | Self::Monthly => ts.date().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageBucket {
    pub label: String,
    pub power_w: f64,
    pub energy_kwh: f64,
}

#[derive(Default)]
struct Sums {
    power_w: f64,
    energy_kwh: f64,
    count: u32,
}

/// Buckets `logs` by local hour or day at `offset`, in label order.
///
/// Logs without a power value count as 0 W.
pub fn summarize(logs: &[ReadingLog], period: UsagePeriod, offset: UtcOffset) -> Vec<UsageBucket> {
    let mut buckets: BTreeMap<String, Sums> = BTreeMap::new();
    for log in logs {
        let sums = buckets.entry(period.label(log.ts.to_offset(offset))).or_default();
        sums.power_w += log.power_w.unwrap_or(0.0);
        sums.energy_kwh += log.energy_kwh;
        sums.count += 1;
    }

    buckets
        .into_iter()
        .map(|(label, s)| {
            let n = f64::from(s.count);
            UsageBucket {
                label,
                power_w: s.power_w / n,
                energy_kwh: s.energy_kwh / n,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    fn log(ts: OffsetDateTime, power_w: Option<f64>, energy_kwh: f64) -> ReadingLog {
        ReadingLog {
            ts,
            device_id: 1,
            power_w,
            energy_kwh,
            cumulative_energy_kwh: energy_kwh,
        }
    }

    #[test]
    fn hourly_buckets_average_within_the_hour() {
        let logs = vec![
            log(datetime!(2024-03-01 10:59 UTC), Some(300.0), 0.75),
            log(datetime!(2024-03-01 09:05 UTC), Some(100.0), 0.125),
            log(datetime!(2024-03-01 10:01 UTC), None, 0.25),
        ];

        let buckets = summarize(&logs, UsagePeriod::Hourly, UtcOffset::UTC);
        assert_eq!(
            buckets,
            vec![
                UsageBucket {
                    label: "2024-03-01 09:00".into(),
                    power_w: 100.0,
                    energy_kwh: 0.125,
                },
                UsageBucket {
                    label: "2024-03-01 10:00".into(),
                    power_w: 150.0,
                    energy_kwh: 0.5,
                },
            ]
        );
    }

    #[test]
    fn daily_buckets_follow_the_local_date() {
        // 20:00 UTC is already the next day at +05:30.
        let logs = vec![
            log(datetime!(2024-03-01 17:00 UTC), Some(200.0), 0.2),
            log(datetime!(2024-03-01 20:00 UTC), Some(400.0), 0.4),
        ];

        let buckets = summarize(&logs, UsagePeriod::Weekly, offset!(+5:30));
        let labels: Vec<_> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-03-01", "2024-03-02"]);
        assert_eq!(buckets[1].power_w, 400.0);
    }

    #[test]
    fn windows_match_their_periods() {
        assert_eq!(UsagePeriod::Hourly.window(), Duration::hours(24));
        assert_eq!(UsagePeriod::Weekly.window(), Duration::days(7));
        assert_eq!(UsagePeriod::Monthly.window(), Duration::days(30));
        assert!(summarize(&[], UsagePeriod::Monthly, UtcOffset::UTC).is_empty());
    }
}
