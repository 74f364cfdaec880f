//! Forward replay of a DP policy from a concrete storage vector.

use tracing::{debug, warn};

use super::grid::StateGrid;
use super::step::PeriodModel;
use super::types::{Diagnostic, DiagnosticKind, Policy, Solution, ValueFunction};
use crate::domain::{Scenario, Trajectory, TrajectoryStep};
use crate::error::OptimizeError;

const DEFAULT_TIE_TOLERANCE: f64 = 1e-9;

/// Trajectory plus the warnings raised while producing it.
#[derive(Debug, Clone)]
pub(crate) struct Simulation {
    pub trajectory: Trajectory,
    pub diagnostics: Vec<Diagnostic>,
}

/// Replays tables on the scenario they were built for; [`simulate`] checks that
/// before handing them over.
pub(crate) struct ForwardSimulator<'a> {
    scenario: &'a Scenario,
    value_function: &'a ValueFunction,
    policy: &'a Policy,
    tie_tolerance: f64,
}

impl<'a> ForwardSimulator<'a> {
    pub fn new(
        scenario: &'a Scenario,
        value_function: &'a ValueFunction,
        policy: &'a Policy,
    ) -> Self {
        Self {
            scenario,
            value_function,
            policy,
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
        }
    }

    pub fn with_tie_tolerance(mut self, tie_tolerance: f64) -> Self {
        self.tie_tolerance = tie_tolerance;
        self
    }

    fn grid(&self) -> &StateGrid {
        self.value_function.grid()
    }

    pub fn run(&self, initial: &[f64]) -> Result<Simulation, OptimizeError> {
        let network = self.scenario.network();
        let horizon = self.scenario.horizon();
        if initial.len() != network.basins().len() {
            return Err(OptimizeError::InitialStateDimension {
                expected: network.basins().len(),
                actual: initial.len(),
            });
        }

        let mut storages = initial.to_vec();
        let mut steps = Vec::with_capacity(horizon.len());
        let mut clamped_periods = Vec::new();
        let mut diagnostics = Vec::new();

        for t in 0..horizon.len() {
            let model = PeriodModel::new(self.scenario, t);
            let next = self.value_function.layer(t + 1);

            if self.grid().index_of(&storages).clamped {
                clamped_periods.push(t);
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ClampedState,
                    Some(t),
                    format!("storages {storages:?} outside the grid, clamped for lookup"),
                ));
            }

            let from_policy = self
                .policy
                .interpolate(self.grid(), t, &storages)
                .map(|flows| model.snap(&flows))
                .and_then(|flows| {
                    let outcome = model.evaluate(&storages, &flows)?;
                    self.grid()
                        .interpolate(next, &outcome.storages_after)
                        .is_finite()
                        .then_some((flows, outcome))
                });

            let fallback = from_policy.is_none();
            let (flows, outcome) = match from_policy {
                Some(applied) => applied,
                None => {
                    let continuation = |after: &[f64]| self.grid().interpolate(next, after);
                    let choice = model
                        .best_decision(&storages, continuation, self.tie_tolerance)
                        .ok_or_else(|| diagnose_infeasible(self.scenario, t, &storages))?;
                    let flows = model.candidates()[choice.index].clone();
                    let outcome = model
                        .evaluate(&storages, &flows)
                        .ok_or_else(|| diagnose_infeasible(self.scenario, t, &storages))?;
                    debug!(period = t, ?flows, "interpolated policy infeasible, re-optimized step");
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::PolicyFallback,
                        Some(t),
                        format!("policy not applicable at storages {storages:?}, used lookahead"),
                    ));
                    (flows, outcome)
                }
            };

            let slot = horizon.period(t);
            steps.push(TrajectoryStep {
                period: t,
                time_start: slot.time_start,
                time_end: slot.time_end,
                storage_before_m3: storages.clone(),
                storage_after_m3: outcome.storages_after.clone(),
                inflow_m3s: model.inflow_m3s().to_vec(),
                flows_m3s: flows,
                power_mw: outcome.power_mw,
                revenue: outcome.revenue,
                penalty: outcome.penalty,
                fallback,
            });
            storages = outcome.storages_after;
        }

        if !clamped_periods.is_empty() {
            warn!(periods = ?clamped_periods, "simulated states left the storage grid");
        }

        Ok(Simulation {
            trajectory: Trajectory {
                steps,
                terminal_value: network.terminal_value(&storages),
                clamped_periods,
            },
            diagnostics,
        })
    }
}

/// Replay `solution`'s policy on `scenario` from `initial`.
pub fn simulate(
    scenario: &Scenario,
    solution: &Solution,
    initial: &[f64],
) -> Result<Trajectory, OptimizeError> {
    let mismatch = |reason: String| OptimizeError::SolutionMismatch {
        solution: solution.scenario.clone(),
        scenario: scenario.name().to_string(),
        reason,
    };
    let expected = StateGrid::new(scenario.network(), scenario.resolution());
    if solution.value_function.grid() != &expected {
        return Err(mismatch("storage grids differ".to_string()));
    }
    if solution.policy.len() != scenario.horizon().len() {
        return Err(mismatch(format!(
            "policy covers {} periods, horizon has {}",
            solution.policy.len(),
            scenario.horizon().len()
        )));
    }
    ForwardSimulator::new(scenario, &solution.value_function, &solution.policy)
        .run(initial)
        .map(|sim| sim.trajectory)
}

/// Walk forward from `storages` at `period`, keeping as much water as any
/// immediately feasible decision allows, and report the first period where
/// no decision keeps the storages within bounds.
///
/// When the walk reaches the end of the horizon the scenario itself is
/// feasible and the failure belongs to the grid.
pub(crate) fn diagnose_infeasible(
    scenario: &Scenario,
    period: usize,
    storages: &[f64],
) -> OptimizeError {
    let mut current = storages.to_vec();
    for t in period..scenario.horizon().len() {
        let model = PeriodModel::new(scenario, t);
        let fullest = model
            .candidates()
            .iter()
            .filter_map(|flows| model.evaluate(&current, flows))
            .max_by(|a, b| {
                let total = |s: &[f64]| s.iter().sum::<f64>();
                total(&a.storages_after).total_cmp(&total(&b.storages_after))
            });
        match fullest {
            Some(outcome) => current = outcome.storages_after,
            None => {
                return OptimizeError::Infeasible {
                    period: t,
                    storages: current,
                    detail: "no release decision within the active flow bounds keeps every basin \
                             within its storage bounds"
                        .to_string(),
                }
            }
        }
    }
    OptimizeError::GridTooCoarse {
        period,
        storages: storages.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::*;
    use crate::domain::{
        Basin, ConstraintSet, Downstream, GenerationModel, Horizon, Network, Turbine, Upstream,
    };
    use crate::optimizer::{DynamicProgrammingOptimizer, OptimizationStrategy};

    fn scenario(prices: &[f64], initial: f64, constraints: ConstraintSet) -> Scenario {
        let network = Network::builder()
            .basin(Basin::new("upper", 0.0, 3600.0, 3600.0).with_constant_inflow(0.0, prices.len()))
            .turbine(Turbine::new(
                "unit",
                Upstream::Basin("upper".to_string()),
                Downstream::Sink { tailwater_level_m: 0.0 },
                1.0,
                GenerationModel::Linear { mw_per_m3s: 1.0 },
            ))
            .build()
            .unwrap();
        let start = DateTime::parse_from_rfc3339("2020-04-01T00:00:00+00:00").unwrap();
        Scenario::builder("single", Arc::new(network), Horizon::hourly(start, prices).unwrap())
            .default_storage_points(3)
            .flow_levels(3)
            .initial_storage("upper", initial)
            .constraints(constraints)
            .build()
            .unwrap()
    }

    #[test]
    fn test_replay_from_grid_state_follows_policy() {
        let s = scenario(&[10.0, 30.0], 3600.0, ConstraintSet::empty("base"));
        let solution = DynamicProgrammingOptimizer::default().optimize(&s).unwrap();
        let trajectory = simulate(&s, &solution, &[3600.0]).unwrap();

        assert_eq!(trajectory.steps.len(), 2);
        assert_eq!(trajectory.steps[0].flows_m3s, vec![0.0]);
        assert_eq!(trajectory.steps[1].flows_m3s, vec![1.0]);
        assert!(trajectory.fallback_periods().is_empty());
        assert!((trajectory.realized_value() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_replay_from_off_grid_state() {
        let s = scenario(&[10.0, 30.0], 3600.0, ConstraintSet::empty("base"));
        let solution = DynamicProgrammingOptimizer::default().optimize(&s).unwrap();
        let trajectory = simulate(&s, &solution, &[2700.0]).unwrap();

        for step in &trajectory.steps {
            let released = step.flows_m3s[0] * 3600.0;
            assert!((step.storage_before_m3[0] - released - step.storage_after_m3[0]).abs() < 1e-9);
            assert!(step.storage_after_m3[0] >= -1e-9);
        }
        assert!(trajectory.clamped_periods.is_empty());
    }

    #[test]
    fn test_rejects_wrong_dimension_and_mismatched_solution() {
        let s = scenario(&[10.0, 30.0], 3600.0, ConstraintSet::empty("base"));
        let solution = DynamicProgrammingOptimizer::default().optimize(&s).unwrap();
        assert_eq!(
            simulate(&s, &solution, &[1.0, 2.0]).unwrap_err(),
            OptimizeError::InitialStateDimension { expected: 1, actual: 2 }
        );

        let finer = s
            .with_resolution(crate::domain::Resolution::uniform(1, 5, 3))
            .unwrap();
        assert!(matches!(
            simulate(&finer, &solution, &[3600.0]),
            Err(OptimizeError::SolutionMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_solution_of_a_longer_horizon() {
        let long = scenario(&[10.0, 30.0, 20.0], 3600.0, ConstraintSet::empty("base"));
        let solution = DynamicProgrammingOptimizer::default().optimize(&long).unwrap();
        let short = scenario(&[10.0, 30.0], 3600.0, ConstraintSet::empty("base"));
        match simulate(&short, &solution, &[3600.0]) {
            Err(OptimizeError::SolutionMismatch { reason, .. }) => {
                assert!(reason.contains("3 periods"), "{reason}");
            }
            other => panic!("expected a mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_diagnosis_blames_the_grid_when_a_path_exists() {
        let s = scenario(&[10.0, 10.0], 3600.0, ConstraintSet::empty("base"));
        assert_eq!(
            diagnose_infeasible(&s, 0, &[3600.0]),
            OptimizeError::GridTooCoarse {
                period: 0,
                storages: vec![3600.0]
            }
        );
    }

    #[test]
    fn test_diagnosis_points_at_first_stuck_period() {
        let set = ConstraintSet::builder("forced").min_flow("unit", [1], 1.0).build().unwrap();
        let s = scenario(&[10.0, 10.0], 1800.0, set);
        match diagnose_infeasible(&s, 0, &[1800.0]) {
            OptimizeError::Infeasible { period, storages, .. } => {
                assert_eq!(period, 1);
                assert_eq!(storages, vec![1800.0]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
