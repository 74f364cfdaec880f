use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use super::types::{OptimizationStrategy, Solution};
use crate::domain::Scenario;
use crate::error::CompareError;

/// Value lost by imposing a variant's constraints on the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpportunityCost {
    pub baseline_value: f64,
    pub variant_value: f64,
    /// `baseline_value - variant_value`.
    pub opportunity_cost: f64,
}

impl OpportunityCost {
    pub fn new(baseline_value: f64, variant_value: f64) -> Self {
        Self {
            baseline_value,
            variant_value,
            opportunity_cost: baseline_value - variant_value,
        }
    }

    /// Cost as a fraction of the baseline value.
    pub fn relative(&self) -> f64 {
        self.opportunity_cost / self.baseline_value.abs().max(f64::EPSILON)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub baseline: Solution,
    pub variants: BTreeMap<String, Solution>,
    pub costs: BTreeMap<String, OpportunityCost>,
}

impl Comparison {
    pub fn cost(&self, variant: &str) -> Option<&OpportunityCost> {
        self.costs.get(variant)
    }
}

/// Solves a baseline and constraint variants with one strategy and diffs their values.
pub struct ScenarioComparator<S> {
    strategy: S,
    parallel: bool,
}

impl<S: OptimizationStrategy> ScenarioComparator<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            parallel: true,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Every scenario is solved over the same candidate flows: the union of
    /// all flow lattices, override endpoints included.
    pub fn compare(
        &self,
        baseline: &Scenario,
        variants: &[Scenario],
    ) -> Result<Comparison, CompareError> {
        let mut names = HashSet::new();
        for variant in variants {
            check_comparable(baseline, variant)?;
            if !names.insert(variant.name()) {
                return Err(CompareError::PreconditionMismatch {
                    variant: variant.name().to_string(),
                    reason: "duplicate variant name".to_string(),
                });
            }
        }

        let shared = shared_flow_lattice(baseline, variants);
        debug!(
            baseline = baseline.name(),
            flows = ?shared.iter().map(Vec::len).collect::<Vec<_>>(),
            "shared flow lattice"
        );
        let baseline = &baseline.with_extra_flows(&shared);
        let variants: Vec<Scenario> =
            variants.iter().map(|v| v.with_extra_flows(&shared)).collect();

        let (baseline_result, variant_results) = self.solve_all(baseline, &variants);
        let baseline_solution = baseline_result?;

        let mut solutions = BTreeMap::new();
        let mut costs = BTreeMap::new();
        for (variant, result) in variants.iter().zip(variant_results) {
            let solution = result?;
            let cost = OpportunityCost::new(baseline_solution.total_value, solution.total_value);
            info!(
                baseline = baseline.name(),
                variant = variant.name(),
                opportunity_cost = cost.opportunity_cost,
                "variant compared"
            );
            costs.insert(variant.name().to_string(), cost);
            solutions.insert(variant.name().to_string(), solution);
        }

        Ok(Comparison {
            baseline: baseline_solution,
            variants: solutions,
            costs,
        })
    }

    fn solve_all(
        &self,
        baseline: &Scenario,
        variants: &[Scenario],
    ) -> (Result<Solution, CompareError>, Vec<Result<Solution, CompareError>>) {
        let solve = |scenario: &Scenario| {
            self.strategy
                .optimize(scenario)
                .map_err(|source| CompareError::Optimize {
                    scenario: scenario.name().to_string(),
                    source,
                })
        };

        #[cfg(feature = "parallel")]
        {
            if self.parallel {
                use rayon::prelude::*;
                return rayon::join(|| solve(baseline), || variants.par_iter().map(solve).collect());
            }
        }
        (solve(baseline), variants.iter().map(solve).collect())
    }
}

fn shared_flow_lattice(baseline: &Scenario, variants: &[Scenario]) -> Vec<Vec<f64>> {
    (0..baseline.network().turbines().len())
        .map(|i| {
            std::iter::once(baseline)
                .chain(variants)
                .flat_map(|s| s.flow_lattice(i))
                .collect()
        })
        .collect()
}

fn check_comparable(baseline: &Scenario, variant: &Scenario) -> Result<(), CompareError> {
    let mismatch = |reason: &str| CompareError::PreconditionMismatch {
        variant: variant.name().to_string(),
        reason: reason.to_string(),
    };
    if !variant.shares_network_with(baseline) {
        return Err(mismatch("network differs"));
    }
    if variant.horizon() != baseline.horizon() {
        return Err(mismatch("horizon or prices differ"));
    }
    if variant.resolution() != baseline.resolution() {
        return Err(mismatch("resolution differs"));
    }
    if variant.initial_storages() != baseline.initial_storages() {
        return Err(mismatch("initial storages differ"));
    }
    Ok(())
}
