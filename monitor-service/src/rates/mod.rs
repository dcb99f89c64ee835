use energy_client::domain::SlabCharge;
use serde::Deserialize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RateError {
    #[error("rate schedule must contain at least one slab")]
    Empty,
    #[error("slab {index}: {reason}")]
    InvalidSlab { index: usize, reason: &'static str },
    #[error("usage must be a finite non-negative number, got {0}")]
    InvalidUsage(f64),
}

/// A pricing bracket. `capacity = None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateSlab {
    #[serde(default)]
    pub capacity: Option<f64>,
    pub rate: f64,
}

impl RateSlab {
    pub const fn bounded(capacity: f64, rate: f64) -> Self {
        Self {
            capacity: Some(capacity),
            rate,
        }
    }

    pub const fn unbounded(rate: f64) -> Self {
        Self { capacity: None, rate }
    }
}

/// The residential slab table. The final slab absorbs any remainder.
pub const DEFAULT_SLABS: [RateSlab; 7] = [
    RateSlab::bounded(100.0, 0.0),
    RateSlab::bounded(100.0, 2.35),
    RateSlab::bounded(200.0, 4.70),
    RateSlab::bounded(100.0, 6.30),
    RateSlab::bounded(100.0, 8.40),
    RateSlab::bounded(200.0, 9.45),
    RateSlab::unbounded(10.50),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CostBreakdown {
    pub total_cost: f64,
    pub charges: Vec<SlabCharge>,
}

impl CostBreakdown {
    pub fn billed_units(&self) -> f64 {
        self.charges.iter().map(|c| c.units).sum()
    }
}

/// Ordered slab schedule.
///
/// Units are charged against each slab in listed order until exhausted.
/// When the last slab is bounded, usage beyond the total capacity is not
/// charged at all.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSchedule {
    slabs: Vec<RateSlab>,
}

impl Default for RateSchedule {
    fn default() -> Self {
        Self {
            slabs: DEFAULT_SLABS.to_vec(),
        }
    }
}

impl RateSchedule {
    pub fn new(slabs: Vec<RateSlab>) -> Result<Self, RateError> {
        if slabs.is_empty() {
            return Err(RateError::Empty);
        }

        let last = slabs.len() - 1;
        for (index, slab) in slabs.iter().enumerate() {
            if !slab.rate.is_finite() || slab.rate < 0.0 {
                return Err(RateError::InvalidSlab {
                    index,
                    reason: "rate must be finite and non-negative",
                });
            }
            match slab.capacity {
                Some(c) if !c.is_finite() || c <= 0.0 => {
                    return Err(RateError::InvalidSlab {
                        index,
                        reason: "capacity must be finite and positive",
                    });
                }
                None if index != last => {
                    return Err(RateError::InvalidSlab {
                        index,
                        reason: "only the last slab may be unbounded",
                    });
                }
                _ => {}
            }
        }

        Ok(Self { slabs })
    }

    pub fn slabs(&self) -> &[RateSlab] {
        &self.slabs
    }

    /// Sum of all capacities, or `None` when the last slab is unbounded.
    pub fn total_capacity(&self) -> Option<f64> {
        self.slabs.iter().map(|s| s.capacity).sum()
    }

    pub fn compute_cost(&self, total_units: f64) -> Result<CostBreakdown, RateError> {
        if !total_units.is_finite() || total_units < 0.0 {
            return Err(RateError::InvalidUsage(total_units));
        }

        let mut remaining = total_units;
        let mut total_cost = 0.0;
        let mut charges = Vec::new();

        for slab in &self.slabs {
            if remaining <= 0.0 {
                break;
            }
            let used = match slab.capacity {
                Some(capacity) => remaining.min(capacity),
                None => remaining,
            };
            let cost = used * slab.rate;
            total_cost += cost;
            charges.push(SlabCharge {
                units: used,
                rate: slab.rate,
                cost,
            });
            remaining -= used;
        }

        Ok(CostBreakdown { total_cost, charges })
    }
}
