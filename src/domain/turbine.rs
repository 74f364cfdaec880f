use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::basin::interpolate_table;
use crate::error::ConstructionError;

const WATER_DENSITY_KG_M3: f64 = 1000.0;
const GRAVITY_M_S2: f64 = 9.81;

/// Where a turbine draws its water from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Upstream {
    /// Water enters the system from outside (e.g. a run-of-river intake).
    External,
    Basin(String),
}

/// Where released water ends up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Downstream {
    /// Water leaves the system at a fixed tailwater level.
    Sink { tailwater_level_m: f64 },
    Basin(String),
}

/// Power produced (MW) for a given flow (m³/s) and head (m).
///
/// All models are monotone non-decreasing in flow and non-negative for
/// non-negative flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum GenerationModel {
    /// No generation, used for spillways and bypass gates.
    None,
    /// Constant productivity, independent of head.
    Linear { mw_per_m3s: f64 },
    /// Efficiency curve as (flow m³/s, power MW) points starting at zero flow.
    Piecewise { points: Vec<(f64, f64)> },
    /// `P = η·ρ·g·head·Q`, with head taken from the connected basins' levels.
    Hydraulic { efficiency: f64 },
}

impl GenerationModel {
    pub fn power_mw(&self, flow_m3s: f64, head_m: f64) -> f64 {
        if flow_m3s <= 0.0 {
            return 0.0;
        }
        match self {
            Self::None => 0.0,
            Self::Linear { mw_per_m3s } => mw_per_m3s * flow_m3s,
            Self::Piecewise { points } => interpolate_table(points, flow_m3s),
            Self::Hydraulic { efficiency } => {
                efficiency * WATER_DENSITY_KG_M3 * GRAVITY_M_S2 * head_m.max(0.0) * flow_m3s / 1.0e6
            }
        }
    }

    pub fn needs_head(&self) -> bool {
        matches!(self, Self::Hydraulic { .. })
    }

    fn validate(&self, turbine: &str) -> Result<(), ConstructionError> {
        let invalid = |reason: &str| ConstructionError::InvalidGeneration {
            turbine: turbine.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::None => Ok(()),
            Self::Linear { mw_per_m3s } => {
                if mw_per_m3s.is_finite() && *mw_per_m3s >= 0.0 {
                    Ok(())
                } else {
                    Err(invalid("productivity must be finite and non-negative"))
                }
            }
            Self::Piecewise { points } => {
                if points.len() < 2 {
                    return Err(invalid("curve needs at least two points"));
                }
                if points[0].0 != 0.0 {
                    return Err(invalid("curve must start at zero flow"));
                }
                if points.iter().any(|(q, p)| !q.is_finite() || !p.is_finite() || *p < 0.0) {
                    return Err(invalid("curve points must be finite with non-negative power"));
                }
                if points.windows(2).any(|w| w[1].0 <= w[0].0) {
                    return Err(invalid("flows must be strictly increasing"));
                }
                if points.windows(2).any(|w| w[1].1 < w[0].1) {
                    return Err(invalid("power must be non-decreasing in flow"));
                }
                Ok(())
            }
            Self::Hydraulic { efficiency } => {
                if efficiency.is_finite() && *efficiency > 0.0 && *efficiency <= 1.0 {
                    Ok(())
                } else {
                    Err(invalid("efficiency must be in (0, 1]"))
                }
            }
        }
    }
}

/// Flow path between two basins that converts released water into power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turbine {
    pub id: String,
    pub upstream: Upstream,
    pub downstream: Downstream,
    pub max_flow_m3s: f64,
    /// Lowest flow at which the unit can run; below it the unit stands still.
    pub min_stable_flow_m3s: f64,
    pub generation: GenerationModel,
    /// Cost charged for every m³ released (e.g. to discourage spilling).
    pub release_penalty_per_m3: f64,
}

impl Turbine {
    pub fn new(
        id: impl Into<String>,
        upstream: Upstream,
        downstream: Downstream,
        max_flow_m3s: f64,
        generation: GenerationModel,
    ) -> Self {
        Self {
            id: id.into(),
            upstream,
            downstream,
            max_flow_m3s,
            min_stable_flow_m3s: 0.0,
            generation,
            release_penalty_per_m3: 0.0,
        }
    }

    /// Non-generating release path.
    pub fn spillway(
        id: impl Into<String>,
        upstream: Upstream,
        downstream: Downstream,
        max_flow_m3s: f64,
    ) -> Self {
        Self::new(id, upstream, downstream, max_flow_m3s, GenerationModel::None)
    }

    pub fn with_min_stable_flow(mut self, min_stable_flow_m3s: f64) -> Self {
        self.min_stable_flow_m3s = min_stable_flow_m3s;
        self
    }

    pub fn with_release_penalty(mut self, per_m3: f64) -> Self {
        self.release_penalty_per_m3 = per_m3;
        self
    }

    pub fn upstream_basin(&self) -> Option<&str> {
        match &self.upstream {
            Upstream::Basin(id) => Some(id),
            Upstream::External => None,
        }
    }

    pub fn downstream_basin(&self) -> Option<&str> {
        match &self.downstream {
            Downstream::Basin(id) => Some(id),
            Downstream::Sink { .. } => None,
        }
    }

    /// Fixed set of flows the optimizer may choose from: standing still plus
    /// `levels` equally spaced flows across the running range.
    ///
    /// The lattice depends only on the default bounds, so narrowing a period's
    /// bounds can only remove choices.
    pub fn flow_lattice(&self, levels: usize) -> Vec<f64> {
        let lo = self.min_stable_flow_m3s;
        let hi = self.max_flow_m3s;
        let mut flows = vec![0.0];
        if hi > 0.0 {
            match levels {
                0 => {}
                1 => flows.push(hi),
                n => {
                    let step = (hi - lo) / (n - 1) as f64;
                    flows.extend(
                        (0..n).map(|i| if i == n - 1 { hi } else { lo + step * i as f64 }),
                    );
                }
            }
        }
        flows
            .into_iter()
            .sorted_by(f64::total_cmp)
            .dedup()
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), ConstructionError> {
        let invalid = |field: &'static str, value: f64| ConstructionError::InvalidValue {
            entity: self.id.clone(),
            field,
            value,
        };
        if !self.max_flow_m3s.is_finite() || self.max_flow_m3s < 0.0 {
            return Err(invalid("max_flow_m3s", self.max_flow_m3s));
        }
        if !self.min_stable_flow_m3s.is_finite() || self.min_stable_flow_m3s < 0.0 {
            return Err(invalid("min_stable_flow_m3s", self.min_stable_flow_m3s));
        }
        if self.min_stable_flow_m3s > self.max_flow_m3s {
            return Err(ConstructionError::InvalidBounds {
                entity: format!("turbine '{}' running range", self.id),
                min: self.min_stable_flow_m3s,
                max: self.max_flow_m3s,
            });
        }
        if !self.release_penalty_per_m3.is_finite() || self.release_penalty_per_m3 < 0.0 {
            return Err(invalid("release_penalty_per_m3", self.release_penalty_per_m3));
        }
        if let Downstream::Sink { tailwater_level_m } = self.downstream {
            if !tailwater_level_m.is_finite() {
                return Err(invalid("tailwater_level_m", tailwater_level_m));
            }
        }
        self.generation.validate(&self.id)
    }
}
