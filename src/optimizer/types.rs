use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use super::grid::StateGrid;
use crate::domain::{Scenario, Trajectory};
use crate::error::OptimizeError;

/// Anything that can turn a scenario into a solution.
#[cfg_attr(test, mockall::automock)]
pub trait OptimizationStrategy: Send + Sync {
    fn optimize(&self, scenario: &Scenario) -> Result<Solution, OptimizeError>;
}

/// Maximum remaining value per (period, grid state).
///
/// Holds `horizon + 1` layers; the last one is the terminal reward. Infeasible
/// states hold negative infinity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueFunction {
    grid: StateGrid,
    layers: Vec<Vec<f64>>,
}

impl ValueFunction {
    pub(crate) fn new(grid: StateGrid, layers: Vec<Vec<f64>>) -> Self {
        Self { grid, layers }
    }

    pub fn grid(&self) -> &StateGrid {
        &self.grid
    }

    /// Number of layers, one more than the horizon length.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, period: usize) -> &[f64] {
        &self.layers[period]
    }

    pub fn at(&self, period: usize, index: usize) -> f64 {
        self.layers[period][index]
    }

    /// Multilinear interpolation of layer `period` at an arbitrary storage vector.
    pub fn value(&self, period: usize, storages: &[f64]) -> f64 {
        self.grid.interpolate(&self.layers[period], storages)
    }

    /// Number of infeasible grid states in a layer.
    pub fn infeasible_count(&self, period: usize) -> usize {
        self.layers[period].iter().filter(|v| !v.is_finite()).count()
    }
}

/// Optimal per-turbine flows per (period, grid state); `None` where no
/// decision is feasible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Policy {
    layers: Vec<Vec<Option<Vec<f64>>>>,
}

impl Policy {
    pub(crate) fn new(layers: Vec<Vec<Option<Vec<f64>>>>) -> Self {
        Self { layers }
    }

    /// Number of periods covered.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn decision(&self, period: usize, index: usize) -> Option<&[f64]> {
        self.layers[period][index].as_deref()
    }

    /// Weighted average of the decisions at the feasible vertices around
    /// `storages`, weights renormalized over those vertices.
    pub fn interpolate(
        &self,
        grid: &StateGrid,
        period: usize,
        storages: &[f64],
    ) -> Option<Vec<f64>> {
        let location = grid.index_of(storages);
        let layer = &self.layers[period];

        let mut total = 0.0;
        let mut flows: Option<Vec<f64>> = None;
        for &(index, weight) in &location.vertices {
            let Some(decision) = &layer[index] else { continue };
            let acc = flows.get_or_insert_with(|| vec![0.0; decision.len()]);
            for (a, q) in acc.iter_mut().zip(decision) {
                *a += weight * q;
            }
            total += weight;
        }
        flows.filter(|_| total > 0.0).map(|mut f| {
            f.iter_mut().for_each(|q| *q /= total);
            f
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum DiagnosticKind {
    /// DP optimum and realized value differ by more than the configured ratio.
    DiscretizationGap,
    /// A simulated state fell outside the grid and was clamped.
    ClampedState,
    /// The interpolated policy could not be applied and the step was re-optimized.
    PolicyFallback,
}

/// Non-fatal numerical warning attached to a solution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub period: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, period: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind,
            period,
            message: message.into(),
        }
    }
}

/// Size of a DP run: `periods × states × decisions` evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkEstimate {
    pub periods: usize,
    pub states: usize,
    /// Largest joint decision count of any period.
    pub decisions: usize,
    pub evaluations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    pub id: Uuid,
    pub scenario: String,
    pub created_at: DateTime<Utc>,
    /// Optimum at the exact initial storages.
    pub total_value: f64,
    pub value_function: ValueFunction,
    pub policy: Policy,
    pub trajectory: Trajectory,
    pub diagnostics: Vec<Diagnostic>,
    pub optimizer_version: String,
}

impl Solution {
    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    /// Realized value of the simulated trajectory.
    pub fn realized_value(&self) -> f64 {
        self.trajectory.realized_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::grid::BasinAxis;

    fn grid() -> StateGrid {
        StateGrid::from_axes(vec![BasinAxis {
            min_m3: 0.0,
            max_m3: 100.0,
            points: 3,
        }])
    }

    #[test]
    fn test_policy_interpolation_renormalizes_over_feasible_vertices() {
        let policy = Policy::new(vec![vec![None, Some(vec![2.0]), Some(vec![4.0])]]);
        let g = grid();
        assert_eq!(policy.interpolate(&g, 0, &[75.0]), Some(vec![3.0]));
        // lower vertex infeasible: all weight goes to the upper one
        assert_eq!(policy.interpolate(&g, 0, &[25.0]), Some(vec![2.0]));
        assert_eq!(policy.interpolate(&g, 0, &[0.0]), None);
        assert_eq!(policy.decision(0, 2), Some(&[4.0][..]));
    }

    #[test]
    fn test_value_function_lookup() {
        let vf = ValueFunction::new(
            grid(),
            vec![vec![f64::NEG_INFINITY, 10.0, 20.0], vec![0.0; 3]],
        );
        assert_eq!(vf.len(), 2);
        assert_eq!(vf.value(0, &[75.0]), 15.0);
        assert_eq!(vf.value(0, &[25.0]), 10.0);
        assert_eq!(vf.value(0, &[0.0]), f64::NEG_INFINITY);
        assert_eq!(vf.infeasible_count(0), 1);
        assert_eq!(vf.infeasible_count(1), 0);
    }

    #[test]
    fn test_diagnostic_kind_display() {
        assert_eq!(DiagnosticKind::DiscretizationGap.to_string(), "discretization_gap");
        assert_eq!(DiagnosticKind::PolicyFallback.to_string(), "policy_fallback");
    }
}
