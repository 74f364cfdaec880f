use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::grid::StateGrid;
use super::simulate::{diagnose_infeasible, ForwardSimulator};
use super::step::PeriodModel;
use super::types::{
    Diagnostic, DiagnosticKind, OptimizationStrategy, Policy, Solution, ValueFunction, WorkEstimate,
};
use crate::config::OptimizerConfig;
use crate::domain::Scenario;
use crate::error::OptimizeError;

pub const OPTIMIZER_VERSION: &str = "dp-v1";

/// Backward-induction optimizer over the discretized storage grid.
#[derive(Debug, Clone, Default)]
pub struct DynamicProgrammingOptimizer {
    config: OptimizerConfig,
}

impl DynamicProgrammingOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn estimate_work(&self, scenario: &Scenario) -> WorkEstimate {
        let states = StateGrid::new(scenario.network(), scenario.resolution()).len();
        let per_period: Vec<usize> = (0..scenario.horizon().len())
            .map(|t| PeriodModel::new(scenario, t).candidates().len())
            .collect();
        WorkEstimate {
            periods: per_period.len(),
            states,
            decisions: per_period.iter().copied().max().unwrap_or(0),
            evaluations: per_period.iter().map(|&d| (d as u64) * (states as u64)).sum(),
        }
    }

    /// Value function and policy for every period, without the forward pass.
    pub fn backward_pass(&self, scenario: &Scenario) -> (ValueFunction, Policy) {
        let network = scenario.network();
        let grid = StateGrid::new(network, scenario.resolution());
        let periods = scenario.horizon().len();

        let mut values: Vec<Vec<f64>> = vec![Vec::new(); periods + 1];
        let mut decisions: Vec<Vec<Option<Vec<f64>>>> = vec![Vec::new(); periods];
        values[periods] =
            self.map_states(grid.len(), |i| network.terminal_value(&grid.state_at(i)));

        for t in (0..periods).rev() {
            let model = PeriodModel::new(scenario, t);
            let next = &values[t + 1];
            let continuation = |after: &[f64]| grid.interpolate(next, after);
            let solved: Vec<(f64, Option<Vec<f64>>)> = self.map_states(grid.len(), |i| {
                let storages = grid.state_at(i);
                match model.best_decision(&storages, continuation, self.config.tie_tolerance) {
                    Some(choice) => (choice.value, Some(model.candidates()[choice.index].clone())),
                    None => (f64::NEG_INFINITY, None),
                }
            });

            let (layer, policy): (Vec<f64>, Vec<Option<Vec<f64>>>) = solved.into_iter().unzip();
            let infeasible = policy.iter().filter(|d| d.is_none()).count();
            debug!(period = t, infeasible, states = grid.len(), "period solved");
            values[t] = layer;
            decisions[t] = policy;
        }

        (ValueFunction::new(grid, values), Policy::new(decisions))
    }

    fn map_states<T, F>(&self, len: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            if self.config.parallel {
                use rayon::prelude::*;
                return (0..len).into_par_iter().map(f).collect();
            }
        }
        (0..len).map(f).collect()
    }
}

impl OptimizationStrategy for DynamicProgrammingOptimizer {
    fn optimize(&self, scenario: &Scenario) -> Result<Solution, OptimizeError> {
        let work = self.estimate_work(scenario);
        info!(
            scenario = scenario.name(),
            periods = work.periods,
            states = work.states,
            decisions = work.decisions,
            evaluations = work.evaluations,
            "starting backward induction"
        );
        if work.evaluations > self.config.work_warning_evaluations {
            warn!(
                scenario = scenario.name(),
                evaluations = work.evaluations,
                threshold = self.config.work_warning_evaluations,
                "work estimate exceeds threshold, consider a coarser resolution"
            );
        }

        let (value_function, policy) = self.backward_pass(scenario);

        let initial = scenario.initial_storages();
        let grid = value_function.grid();
        let first = PeriodModel::new(scenario, 0);
        let total_value = first
            .best_decision(
                initial,
                |after| grid.interpolate(value_function.layer(1), after),
                self.config.tie_tolerance,
            )
            .map(|choice| choice.value)
            .ok_or_else(|| diagnose_infeasible(scenario, 0, initial))?;

        let simulation = ForwardSimulator::new(scenario, &value_function, &policy)
            .with_tie_tolerance(self.config.tie_tolerance)
            .run(initial)?;
        let mut diagnostics = simulation.diagnostics;

        let realized = simulation.trajectory.realized_value();
        let gap = (total_value - realized).abs() / total_value.abs().max(1.0);
        if gap > self.config.gap_warning_ratio {
            warn!(
                scenario = scenario.name(),
                total_value,
                realized,
                gap,
                "realized value deviates from DP optimum"
            );
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::DiscretizationGap,
                None,
                format!(
                    "DP optimum {total_value:.4} vs realized {realized:.4} (relative gap {gap:.4})"
                ),
            ));
        }

        info!(scenario = scenario.name(), total_value, realized, "optimization finished");

        Ok(Solution {
            id: Uuid::new_v4(),
            scenario: scenario.name().to_string(),
            created_at: Utc::now(),
            total_value,
            value_function,
            policy,
            trajectory: simulation.trajectory,
            diagnostics,
            optimizer_version: OPTIMIZER_VERSION.to_string(),
        })
    }
}
