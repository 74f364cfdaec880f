use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;

/// Maps a stored volume to a water surface level (m above reference).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum LevelCurve {
    /// Level independent of volume, e.g. a lake too large to matter.
    Flat { level_m: f64 },
    /// Wedge-shaped basin: the level rises with the square root of the fill fraction.
    Wedge { empty_m: f64, full_m: f64 },
    /// Measured (volume m³, level m) pairs, strictly increasing in volume.
    Table { points: Vec<(f64, f64)> },
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self::Flat { level_m: 0.0 }
    }
}

impl LevelCurve {
    /// Level at `volume_m3` for a basin spanning `[min_m3, max_m3]`.
    pub fn level_at(&self, volume_m3: f64, min_m3: f64, max_m3: f64) -> f64 {
        match self {
            Self::Flat { level_m } => *level_m,
            Self::Wedge { empty_m, full_m } => {
                let span = max_m3 - min_m3;
                if span <= 0.0 || full_m <= empty_m {
                    return *empty_m;
                }
                let fill = ((volume_m3 - min_m3) / span).clamp(0.0, 1.0);
                empty_m + (full_m - empty_m) * fill.sqrt()
            }
            Self::Table { points } => interpolate_table(points, volume_m3),
        }
    }

    fn validate(&self, basin: &str) -> Result<(), ConstructionError> {
        let invalid = |reason: &str| ConstructionError::InvalidLevelCurve {
            basin: basin.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Flat { level_m } if !level_m.is_finite() => Err(invalid("level is not finite")),
            Self::Wedge { empty_m, full_m } => {
                if !empty_m.is_finite() || !full_m.is_finite() {
                    Err(invalid("levels are not finite"))
                } else if full_m < empty_m {
                    Err(invalid("full level below empty level"))
                } else {
                    Ok(())
                }
            }
            Self::Table { points } => {
                if points.len() < 2 {
                    return Err(invalid("table needs at least two points"));
                }
                if points.iter().any(|(v, l)| !v.is_finite() || !l.is_finite()) {
                    return Err(invalid("table contains non-finite values"));
                }
                if points.windows(2).any(|w| w[1].0 <= w[0].0) {
                    return Err(invalid("volumes must be strictly increasing"));
                }
                Ok(())
            }
            Self::Flat { .. } => Ok(()),
        }
    }
}

/// Linear interpolation over sorted `(x, y)` pairs, clamped at both ends.
pub(crate) fn interpolate_table(points: &[(f64, f64)], x: f64) -> f64 {
    let Some(first) = points.first() else {
        return 0.0;
    };
    if x <= first.0 {
        return first.1;
    }
    for w in points.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        if x <= x1 {
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    points.last().map(|p| p.1).unwrap_or(first.1)
}

/// Value assigned to the storage left in a basin at the end of the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalValue {
    #[default]
    None,
    /// Linear penalty for every m³ the final storage falls short of `volume_m3`.
    Target {
        volume_m3: f64,
        shortfall_penalty_per_m3: f64,
    },
    /// Every m³ left over is worth `per_m3`.
    WaterValue { per_m3: f64 },
}

impl TerminalValue {
    pub fn evaluate(&self, volume_m3: f64) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Target {
                volume_m3: target,
                shortfall_penalty_per_m3,
            } => -shortfall_penalty_per_m3 * (target - volume_m3).max(0.0),
            Self::WaterValue { per_m3 } => per_m3 * volume_m3,
        }
    }
}

/// Water storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basin {
    pub id: String,
    pub min_volume_m3: f64,
    pub max_volume_m3: f64,
    pub initial_volume_m3: f64,
    /// Natural inflow per period (m³/s).
    pub inflow_m3s: Vec<f64>,
    pub terminal: TerminalValue,
    pub level_curve: LevelCurve,
}

impl Basin {
    pub fn new(
        id: impl Into<String>,
        min_volume_m3: f64,
        max_volume_m3: f64,
        initial_volume_m3: f64,
    ) -> Self {
        Self {
            id: id.into(),
            min_volume_m3,
            max_volume_m3,
            initial_volume_m3,
            inflow_m3s: Vec::new(),
            terminal: TerminalValue::None,
            level_curve: LevelCurve::default(),
        }
    }

    pub fn with_inflow(mut self, inflow_m3s: Vec<f64>) -> Self {
        self.inflow_m3s = inflow_m3s;
        self
    }

    pub fn with_constant_inflow(mut self, inflow_m3s: f64, periods: usize) -> Self {
        self.inflow_m3s = vec![inflow_m3s; periods];
        self
    }

    pub fn with_terminal(mut self, terminal: TerminalValue) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_level_curve(mut self, level_curve: LevelCurve) -> Self {
        self.level_curve = level_curve;
        self
    }

    pub fn level_at(&self, volume_m3: f64) -> f64 {
        self.level_curve
            .level_at(volume_m3, self.min_volume_m3, self.max_volume_m3)
    }

    pub fn inflow_at(&self, period: usize) -> f64 {
        self.inflow_m3s.get(period).copied().unwrap_or(0.0)
    }

    pub(crate) fn validate(&self) -> Result<(), ConstructionError> {
        let invalid = |field: &'static str, value: f64| ConstructionError::InvalidValue {
            entity: self.id.clone(),
            field,
            value,
        };
        if !self.min_volume_m3.is_finite() || self.min_volume_m3 < 0.0 {
            return Err(invalid("min_volume_m3", self.min_volume_m3));
        }
        if !self.max_volume_m3.is_finite() {
            return Err(invalid("max_volume_m3", self.max_volume_m3));
        }
        if self.min_volume_m3 > self.max_volume_m3 {
            return Err(ConstructionError::InvalidBounds {
                entity: format!("basin '{}'", self.id),
                min: self.min_volume_m3,
                max: self.max_volume_m3,
            });
        }
        if !self.initial_volume_m3.is_finite()
            || self.initial_volume_m3 < self.min_volume_m3
            || self.initial_volume_m3 > self.max_volume_m3
        {
            return Err(ConstructionError::InitialOutOfBounds {
                basin: self.id.clone(),
                value: self.initial_volume_m3,
                min: self.min_volume_m3,
                max: self.max_volume_m3,
            });
        }
        if let Some(bad) = self.inflow_m3s.iter().find(|q| !q.is_finite()) {
            return Err(invalid("inflow_m3s", *bad));
        }
        match self.terminal {
            TerminalValue::None => {}
            TerminalValue::Target {
                volume_m3,
                shortfall_penalty_per_m3,
            } => {
                if !volume_m3.is_finite() {
                    return Err(invalid("terminal target", volume_m3));
                }
                if !shortfall_penalty_per_m3.is_finite() || shortfall_penalty_per_m3 < 0.0 {
                    return Err(invalid("terminal shortfall penalty", shortfall_penalty_per_m3));
                }
            }
            TerminalValue::WaterValue { per_m3 } => {
                if !per_m3.is_finite() {
                    return Err(invalid("terminal water value", per_m3));
                }
            }
        }
        self.level_curve.validate(&self.id)
    }
}
