use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;

pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// One optimization period with its energy price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub time_start: DateTime<FixedOffset>,
    pub time_end: DateTime<FixedOffset>,
    pub price_per_mwh: f64,
}

impl Period {
    pub fn duration_seconds(&self) -> f64 {
        self.time_end
            .signed_duration_since(self.time_start)
            .num_seconds() as f64
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_seconds() / SECONDS_PER_HOUR
    }

    pub fn contains(&self, t: DateTime<FixedOffset>) -> bool {
        t >= self.time_start && t < self.time_end
    }
}

/// Ordered, non-overlapping sequence of periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Horizon {
    periods: Vec<Period>,
}

impl Horizon {
    pub fn new(periods: Vec<Period>) -> Result<Self, ConstructionError> {
        if periods.is_empty() {
            return Err(ConstructionError::EmptyHorizon);
        }
        for (i, p) in periods.iter().enumerate() {
            if p.time_end <= p.time_start {
                return Err(ConstructionError::InvalidPeriod {
                    period: i,
                    reason: "end must be after start".to_string(),
                });
            }
            if !p.price_per_mwh.is_finite() {
                return Err(ConstructionError::InvalidPeriod {
                    period: i,
                    reason: format!("price {} is not finite", p.price_per_mwh),
                });
            }
            if i > 0 && p.time_start < periods[i - 1].time_end {
                return Err(ConstructionError::InvalidPeriod {
                    period: i,
                    reason: "overlaps the previous period".to_string(),
                });
            }
        }
        Ok(Self { periods })
    }

    /// Back-to-back one-hour periods starting at `start`, one per price.
    pub fn hourly(
        start: DateTime<FixedOffset>,
        prices_per_mwh: &[f64],
    ) -> Result<Self, ConstructionError> {
        let periods = prices_per_mwh
            .iter()
            .enumerate()
            .map(|(i, &price)| {
                let time_start = start + Duration::hours(i as i64);
                Period {
                    time_start,
                    time_end: time_start + Duration::hours(1),
                    price_per_mwh: price,
                }
            })
            .collect();
        Self::new(periods)
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn period(&self, t: usize) -> &Period {
        &self.periods[t]
    }

    pub fn prices(&self) -> impl Iterator<Item = f64> + '_ {
        self.periods.iter().map(|p| p.price_per_mwh)
    }

    pub fn period_index_at(&self, t: DateTime<FixedOffset>) -> Option<usize> {
        self.periods.iter().position(|p| p.contains(t))
    }
}
