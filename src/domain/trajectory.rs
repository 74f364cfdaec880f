use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One realized period of a forward simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub period: usize,
    pub time_start: DateTime<FixedOffset>,
    pub time_end: DateTime<FixedOffset>,
    pub storage_before_m3: Vec<f64>,
    pub storage_after_m3: Vec<f64>,
    pub inflow_m3s: Vec<f64>,
    pub flows_m3s: Vec<f64>,
    pub power_mw: Vec<f64>,
    pub revenue: f64,
    pub penalty: f64,
    /// The interpolated policy was infeasible here and the step was re-optimized.
    pub fallback: bool,
}

impl TrajectoryStep {
    pub fn value(&self) -> f64 {
        self.revenue - self.penalty
    }

    pub fn energy_mwh(&self) -> f64 {
        let hours = self
            .time_end
            .signed_duration_since(self.time_start)
            .num_seconds() as f64
            / 3600.0;
        self.power_mw.iter().sum::<f64>() * hours
    }
}

/// Continuous-valued path obtained by replaying a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub steps: Vec<TrajectoryStep>,
    /// Terminal reward of the final storages.
    pub terminal_value: f64,
    /// Periods where the start state had to be clamped into the grid.
    pub clamped_periods: Vec<usize>,
}

impl Trajectory {
    /// Revenue minus penalties over all periods, plus the terminal value.
    pub fn realized_value(&self) -> f64 {
        self.steps.iter().map(TrajectoryStep::value).sum::<f64>() + self.terminal_value
    }

    pub fn total_energy_mwh(&self) -> f64 {
        self.steps.iter().map(TrajectoryStep::energy_mwh).sum()
    }

    pub fn final_storages(&self) -> Option<&[f64]> {
        self.steps.last().map(|s| s.storage_after_m3.as_slice())
    }

    pub fn fallback_periods(&self) -> Vec<usize> {
        self.steps.iter().filter(|s| s.fallback).map(|s| s.period).collect()
    }

    /// Turbine flows in effect at instant `t`.
    pub fn flows_at(&self, t: DateTime<FixedOffset>) -> Option<&[f64]> {
        self.steps
            .iter()
            .find(|s| t >= s.time_start && t < s.time_end)
            .map(|s| s.flows_m3s.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn step(period: usize, flows: Vec<f64>, power: Vec<f64>, revenue: f64) -> TrajectoryStep {
        let start = DateTime::parse_from_rfc3339("2020-04-01T00:00:00+00:00").unwrap()
            + Duration::hours(period as i64);
        TrajectoryStep {
            period,
            time_start: start,
            time_end: start + Duration::hours(1),
            storage_before_m3: vec![0.0],
            storage_after_m3: vec![period as f64],
            inflow_m3s: vec![0.0],
            flows_m3s: flows,
            power_mw: power,
            revenue,
            penalty: 1.0,
            fallback: period == 1,
        }
    }

    #[test]
    fn test_totals() {
        let trajectory = Trajectory {
            steps: vec![
                step(0, vec![1.0], vec![2.0], 10.0),
                step(1, vec![0.5], vec![1.0], 5.0),
            ],
            terminal_value: 3.0,
            clamped_periods: vec![],
        };
        assert_eq!(trajectory.realized_value(), 10.0 - 1.0 + 5.0 - 1.0 + 3.0);
        assert_eq!(trajectory.total_energy_mwh(), 3.0);
        assert_eq!(trajectory.final_storages(), Some(&[1.0][..]));
        assert_eq!(trajectory.fallback_periods(), vec![1]);
    }

    #[test]
    fn test_flows_at() {
        let trajectory = Trajectory {
            steps: vec![step(0, vec![1.0], vec![2.0], 10.0), step(1, vec![0.5], vec![1.0], 5.0)],
            terminal_value: 0.0,
            clamped_periods: vec![],
        };
        let t0 = trajectory.steps[0].time_start;
        assert_eq!(trajectory.flows_at(t0 + Duration::minutes(30)), Some(&[1.0][..]));
        assert_eq!(trajectory.flows_at(t0 + Duration::minutes(90)), Some(&[0.5][..]));
        assert_eq!(trajectory.flows_at(t0 + Duration::hours(5)), None);
    }
}
