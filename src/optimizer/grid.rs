//! Storage grid over the joint basin state space.
//!
//! Each basin's storage interval is split into equally spaced levels (both
//! bounds included). The joint grid is the Cartesian product of those axes,
//! addressed by a flat mixed-radix index with the first basin varying fastest.
//! Nothing is materialized: a state vector is computed from its index on demand.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::domain::{Network, Resolution};

/// Fraction below which an interpolation weight snaps to a grid node.
const SNAP: f64 = 1e-12;

/// Grid of one basin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinAxis {
    pub min_m3: f64,
    pub max_m3: f64,
    pub points: usize,
}

impl BasinAxis {
    pub fn step(&self) -> f64 {
        (self.max_m3 - self.min_m3) / (self.points - 1) as f64
    }

    pub fn level(&self, i: usize) -> f64 {
        if i + 1 == self.points {
            self.max_m3
        } else {
            self.min_m3 + self.step() * i as f64
        }
    }

    fn tolerance(&self) -> f64 {
        1e-9 * (self.max_m3 - self.min_m3).abs().max(1.0)
    }

    /// Lower bracketing node, fractional position towards the next node, and
    /// whether the value had to be clamped into range.
    fn bracket(&self, volume_m3: f64) -> (usize, f64, bool) {
        let tol = self.tolerance();
        let clamped = volume_m3 < self.min_m3 - tol || volume_m3 > self.max_m3 + tol;
        let v = volume_m3.clamp(self.min_m3, self.max_m3);
        let step = self.step();
        if step <= 0.0 {
            return (0, 0.0, clamped);
        }
        let pos = (v - self.min_m3) / step;
        let lo = (pos.floor() as usize).min(self.points - 2);
        let mut frac = (pos - lo as f64).clamp(0.0, 1.0);
        if frac < SNAP {
            frac = 0.0;
        } else if frac > 1.0 - SNAP {
            frac = 1.0;
        }
        (lo, frac, clamped)
    }
}

/// Where an arbitrary storage vector sits on the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLocation {
    /// Flat index of the closest grid node.
    pub nearest: usize,
    /// Surrounding nodes with their multilinear weights; zero weights are left out.
    pub vertices: Vec<(usize, f64)>,
    /// At least one storage lay outside its basin's range and was clamped.
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateGrid {
    axes: Vec<BasinAxis>,
    strides: Vec<usize>,
    len: usize,
}

impl StateGrid {
    pub fn new(network: &Network, resolution: &Resolution) -> Self {
        let axes = network
            .basins()
            .iter()
            .zip(&resolution.storage_points)
            .map(|(b, &points)| BasinAxis {
                min_m3: b.min_volume_m3,
                max_m3: b.max_volume_m3,
                points,
            })
            .collect();
        Self::from_axes(axes)
    }

    pub fn from_axes(axes: Vec<BasinAxis>) -> Self {
        let mut strides = Vec::with_capacity(axes.len());
        let mut len = 1usize;
        for axis in &axes {
            strides.push(len);
            len *= axis.points;
        }
        Self { axes, strides, len }
    }

    /// Number of joint states.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dims(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[BasinAxis] {
        &self.axes
    }

    /// Ordered storage levels of one basin.
    pub fn grid_for(&self, basin: usize) -> Vec<f64> {
        let axis = &self.axes[basin];
        (0..axis.points).map(|i| axis.level(i)).collect()
    }

    pub fn flat_index(&self, coords: &[usize]) -> usize {
        coords.iter().zip(&self.strides).map(|(c, s)| c * s).sum()
    }

    pub fn coords(&self, index: usize) -> Vec<usize> {
        self.axes
            .iter()
            .zip(&self.strides)
            .map(|(axis, stride)| (index / stride) % axis.points)
            .collect()
    }

    /// Storage vector of a grid node.
    pub fn state_at(&self, index: usize) -> Vec<f64> {
        self.axes
            .iter()
            .zip(&self.strides)
            .map(|(axis, stride)| axis.level((index / stride) % axis.points))
            .collect()
    }

    /// Nearest node and multilinear interpolation weights for `storages`.
    pub fn index_of(&self, storages: &[f64]) -> GridLocation {
        let mut clamped = false;
        let mut nearest = 0;
        let mut per_axis: Vec<Vec<(usize, f64)>> = Vec::with_capacity(self.axes.len());

        for ((axis, stride), &v) in self.axes.iter().zip(&self.strides).zip(storages) {
            let (lo, frac, c) = axis.bracket(v);
            clamped |= c;
            let near = if frac >= 0.5 { lo + 1 } else { lo };
            nearest += near.min(axis.points - 1) * stride;

            let terms = if frac == 0.0 {
                vec![(lo * stride, 1.0)]
            } else if frac == 1.0 {
                vec![((lo + 1) * stride, 1.0)]
            } else {
                vec![(lo * stride, 1.0 - frac), ((lo + 1) * stride, frac)]
            };
            per_axis.push(terms);
        }

        let vertices = per_axis
            .into_iter()
            .multi_cartesian_product()
            .map(|combo| {
                combo
                    .iter()
                    .fold((0usize, 1.0f64), |(idx, w), &(offset, wi)| (idx + offset, w * wi))
            })
            .filter(|&(_, w)| w > 0.0)
            .collect();

        GridLocation {
            nearest,
            vertices,
            clamped,
        }
    }

    /// Interpolate a per-node table at `storages`.
    ///
    /// Infeasible vertices are skipped and the remaining weights renormalized.
    /// Returns negative infinity only when no vertex carrying weight is feasible.
    pub fn interpolate(&self, values: &[f64], storages: &[f64]) -> f64 {
        Self::weighted(values, &self.index_of(storages).vertices)
    }

    pub(crate) fn weighted(values: &[f64], vertices: &[(usize, f64)]) -> f64 {
        let (acc, total) = vertices
            .iter()
            .map(|&(idx, w)| (values[idx], w))
            .filter(|(v, _)| v.is_finite())
            .fold((0.0, 0.0), |(acc, total), (v, w)| (acc + w * v, total + w));
        if total > 0.0 {
            acc / total
        } else {
            f64::NEG_INFINITY
        }
    }
}
