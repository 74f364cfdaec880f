use itertools::Itertools;

use crate::domain::{Bounds, Network, Scenario};

/// Result of applying one decision to one start state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StepOutcome {
    pub storages_after: Vec<f64>,
    pub power_mw: Vec<f64>,
    pub revenue: f64,
    pub penalty: f64,
}

impl StepOutcome {
    pub fn reward(&self) -> f64 {
        self.revenue - self.penalty
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Choice {
    /// Index into [`PeriodModel::candidates`].
    pub index: usize,
    pub value: f64,
}

/// Everything needed to evaluate decisions of a single period.
#[derive(Debug)]
pub(crate) struct PeriodModel<'a> {
    network: &'a Network,
    price: f64,
    duration_s: f64,
    hours: f64,
    inflow_m3s: Vec<f64>,
    storage_bounds: Vec<Bounds>,
    storage_tolerance: Vec<f64>,
    turbine_flows: Vec<Vec<f64>>,
    candidates: Vec<Vec<f64>>,
}

/// Lattice flows admitted by `active`.
///
/// The lattice carries the endpoints of every flow override, so narrowing the
/// active bounds only ever removes candidates.
pub(crate) fn admissible_flows(lattice: &[f64], active: Bounds, max_flow: f64) -> Vec<f64> {
    let tol = 1e-9 * max_flow.max(1.0);
    lattice
        .iter()
        .copied()
        .filter(|&q| active.contains(q, tol))
        .collect()
}

impl<'a> PeriodModel<'a> {
    pub fn new(scenario: &'a Scenario, period: usize) -> Self {
        let network = scenario.network();
        let active = scenario.active_bounds();
        let slot = scenario.horizon().period(period);

        let turbine_flows: Vec<Vec<f64>> = network
            .turbines()
            .iter()
            .enumerate()
            .map(|(i, turbine)| {
                admissible_flows(
                    &scenario.flow_lattice(i),
                    active.turbine_flow(i, period),
                    turbine.max_flow_m3s,
                )
            })
            .collect();

        let candidates = if turbine_flows.is_empty() {
            vec![Vec::new()]
        } else {
            turbine_flows
                .iter()
                .map(|flows| flows.iter().copied())
                .multi_cartesian_product()
                .collect()
        };

        let storage_bounds: Vec<Bounds> = (0..network.basins().len())
            .map(|b| active.basin_storage(b, period))
            .collect();
        let storage_tolerance = network
            .basins()
            .iter()
            .map(|b| 1e-9 * (b.max_volume_m3 - b.min_volume_m3).abs().max(1.0))
            .collect();

        Self {
            network,
            price: slot.price_per_mwh,
            duration_s: slot.duration_seconds(),
            hours: slot.duration_hours(),
            inflow_m3s: network.basins().iter().map(|b| b.inflow_at(period)).collect(),
            storage_bounds,
            storage_tolerance,
            turbine_flows,
            candidates,
        }
    }

    /// Joint decisions in lexicographic enumeration order.
    pub fn candidates(&self) -> &[Vec<f64>] {
        &self.candidates
    }

    pub fn inflow_m3s(&self) -> &[f64] {
        &self.inflow_m3s
    }

    /// Snap a continuous flow vector onto each turbine's admissible flows.
    /// Equidistant flows resolve to the smaller one.
    pub fn snap(&self, flows: &[f64]) -> Vec<f64> {
        self.turbine_flows
            .iter()
            .zip(flows)
            .map(|(options, &q)| {
                options
                    .iter()
                    .copied()
                    .fold(None, |best: Option<f64>, c| match best {
                        Some(b) if (b - q).abs() <= (c - q).abs() => Some(b),
                        _ => Some(c),
                    })
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Apply `flows` to `storages` for one period.
    ///
    /// Returns `None` when a storage leaves its active bounds.
    pub fn evaluate(&self, storages: &[f64], flows: &[f64]) -> Option<StepOutcome> {
        let mut after: Vec<f64> = storages
            .iter()
            .zip(&self.inflow_m3s)
            .map(|(s, inflow)| s + inflow * self.duration_s)
            .collect();

        let mut power_mw = Vec::with_capacity(flows.len());
        let mut penalty = 0.0;
        for (i, (turbine, &q)) in self.network.turbines().iter().zip(flows).enumerate() {
            let links = self.network.links(i);
            let volume = q * self.duration_s;
            if let Some(u) = links.upstream {
                after[u] -= volume;
            }
            if let Some(d) = links.downstream {
                after[d] += volume;
            }
            let head = if turbine.generation.needs_head() {
                self.network.head_m(i, storages)
            } else {
                0.0
            };
            power_mw.push(turbine.generation.power_mw(q, head));
            penalty += turbine.release_penalty_per_m3 * volume;
        }

        let within = after
            .iter()
            .zip(&self.storage_bounds)
            .zip(&self.storage_tolerance)
            .all(|((&v, bounds), &tol)| bounds.contains(v, tol));
        if !within {
            return None;
        }

        let revenue = self.price * power_mw.iter().sum::<f64>() * self.hours;
        Some(StepOutcome {
            storages_after: after,
            power_mw,
            revenue,
            penalty,
        })
    }

    /// Best candidate at `storages` given a continuation value of the end state.
    ///
    /// Values within `tie_tolerance` (relative) of the maximum are ties; the
    /// smallest aggregate flow wins, then the earliest candidate.
    pub fn best_decision<F>(
        &self,
        storages: &[f64],
        continuation: F,
        tie_tolerance: f64,
    ) -> Option<Choice>
    where
        F: Fn(&[f64]) -> f64,
    {
        let scored: Vec<Choice> = self
            .candidates
            .iter()
            .enumerate()
            .filter_map(|(index, flows)| {
                let outcome = self.evaluate(storages, flows)?;
                let value = outcome.reward() + continuation(&outcome.storages_after);
                value.is_finite().then_some(Choice { index, value })
            })
            .collect();

        let best = scored.iter().map(|c| c.value).fold(f64::NEG_INFINITY, f64::max);
        if !best.is_finite() {
            return None;
        }
        let tol = tie_tolerance * best.abs().max(1.0);
        let aggregate = |c: &Choice| self.candidates[c.index].iter().sum::<f64>();

        scored
            .iter()
            .filter(|c| best - c.value <= tol)
            .fold(None, |winner: Option<&Choice>, c| match winner {
                Some(w) if aggregate(w) <= aggregate(c) => Some(w),
                _ => Some(c),
            })
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::*;
    use crate::domain::{
        Basin, ConstraintSet, Downstream, GenerationModel, Horizon, Turbine, Upstream,
    };

    fn scenario(prices: &[f64], constraints: ConstraintSet) -> Scenario {
        let network = Network::builder()
            .basin(Basin::new("upper", 0.0, 3600.0, 3600.0).with_constant_inflow(0.0, prices.len()))
            .turbine(
                Turbine::new(
                    "unit",
                    Upstream::Basin("upper".to_string()),
                    Downstream::Sink { tailwater_level_m: 0.0 },
                    1.0,
                    GenerationModel::Linear { mw_per_m3s: 1.0 },
                )
                .with_release_penalty(0.001),
            )
            .build()
            .unwrap();
        let start = DateTime::parse_from_rfc3339("2020-04-01T00:00:00+00:00").unwrap();
        Scenario::builder("test", Arc::new(network), Horizon::hourly(start, prices).unwrap())
            .default_storage_points(3)
            .flow_levels(3)
            .constraints(constraints)
            .build()
            .unwrap()
    }

    #[test]
    fn test_admissible_flows_filter_the_lattice() {
        let lattice = [0.0, 0.5, 1.0];
        assert_eq!(admissible_flows(&lattice, Bounds::new(0.0, 1.0), 1.0), vec![0.0, 0.5, 1.0]);
        assert_eq!(admissible_flows(&lattice, Bounds::new(0.0, 0.0), 1.0), vec![0.0]);
        assert_eq!(admissible_flows(&lattice, Bounds::new(0.5, 1.0), 1.0), vec![0.5, 1.0]);
        assert!(admissible_flows(&lattice, Bounds::new(0.6, 0.8), 1.0).is_empty());
    }

    #[test]
    fn test_override_between_lattice_points_becomes_a_candidate() {
        let set = ConstraintSet::builder("band")
            .turbine_flow("unit", [0], Bounds::new(0.6, 0.8))
            .build()
            .unwrap();
        let s = scenario(&[10.0, 10.0], set);
        assert_eq!(PeriodModel::new(&s, 0).candidates(), &[vec![0.6], vec![0.8]]);
        // the endpoints are offered in the unconstrained period too
        assert_eq!(PeriodModel::new(&s, 1).candidates().len(), 5);
    }

    #[test]
    fn test_mass_balance_and_revenue() {
        let s = scenario(&[10.0], ConstraintSet::empty("base"));
        let model = PeriodModel::new(&s, 0);
        assert_eq!(model.candidates(), &[vec![0.0], vec![0.5], vec![1.0]]);

        let outcome = model.evaluate(&[3600.0], &[0.5]).unwrap();
        assert_eq!(outcome.storages_after, vec![1800.0]);
        assert_eq!(outcome.power_mw, vec![0.5]);
        assert!((outcome.revenue - 5.0).abs() < 1e-12);
        assert!((outcome.penalty - 1.8).abs() < 1e-12);

        assert!(model.evaluate(&[1800.0], &[1.0]).is_none());
    }

    #[test]
    fn test_outage_leaves_only_standing() {
        let set = ConstraintSet::builder("outage").outage("unit", [0]).build().unwrap();
        let s = scenario(&[10.0, 10.0], set);
        assert_eq!(PeriodModel::new(&s, 0).candidates(), &[vec![0.0]]);
        assert_eq!(PeriodModel::new(&s, 1).candidates().len(), 3);
    }

    #[test]
    fn test_snap_prefers_smaller_flow_on_ties() {
        let s = scenario(&[10.0], ConstraintSet::empty("base"));
        let model = PeriodModel::new(&s, 0);
        assert_eq!(model.snap(&[0.25]), vec![0.0]);
        assert_eq!(model.snap(&[0.3]), vec![0.5]);
        assert_eq!(model.snap(&[0.9]), vec![1.0]);
    }

    #[test]
    fn test_best_decision_tie_goes_to_smallest_flow() {
        let s = scenario(&[10.0], ConstraintSet::empty("base"));
        let model = PeriodModel::new(&s, 0);
        // continuation exactly compensates revenue minus penalty: every candidate ties
        let compensate = |after: &[f64]| (after[0] - 3600.0) / 3600.0 * 10.0 * (1.0 - 0.36);
        let choice = model.best_decision(&[3600.0], compensate, 1e-9).unwrap();
        assert_eq!(choice.index, 0);

        let choice = model.best_decision(&[3600.0], |_| 0.0, 1e-9).unwrap();
        assert_eq!(model.candidates()[choice.index], vec![1.0]);
        assert!((choice.value - (10.0 - 3.6)).abs() < 1e-9);

        assert!(model
            .best_decision(&[3600.0], |_| f64::NEG_INFINITY, 1e-9)
            .is_none());
    }
}
