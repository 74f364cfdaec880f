use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::basin::Basin;
use super::turbine::{Downstream, Turbine};
use crate::error::ConstructionError;

/// Turbine endpoints resolved to basin indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurbineLinks {
    pub upstream: Option<usize>,
    pub downstream: Option<usize>,
}

/// Basins and turbines stored by index. Turbines refer to basins by index only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    basins: Vec<Basin>,
    turbines: Vec<Turbine>,
    links: Vec<TurbineLinks>,
}

#[derive(Debug, Default)]
pub struct NetworkBuilder {
    basins: Vec<Basin>,
    turbines: Vec<Turbine>,
}

impl NetworkBuilder {
    pub fn basin(mut self, basin: Basin) -> Self {
        self.basins.push(basin);
        self
    }

    pub fn turbine(mut self, turbine: Turbine) -> Self {
        self.turbines.push(turbine);
        self
    }

    pub fn build(self) -> Result<Network, ConstructionError> {
        if self.basins.is_empty() {
            return Err(ConstructionError::EmptyNetwork);
        }

        let mut seen = HashSet::new();
        for basin in &self.basins {
            basin.validate()?;
            if !seen.insert(basin.id.as_str()) {
                return Err(ConstructionError::DuplicateId {
                    kind: "basin",
                    id: basin.id.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut links = Vec::with_capacity(self.turbines.len());
        for turbine in &self.turbines {
            turbine.validate()?;
            if !seen.insert(turbine.id.as_str()) {
                return Err(ConstructionError::DuplicateId {
                    kind: "turbine",
                    id: turbine.id.clone(),
                });
            }

            let resolve = |id: &str| {
                self.basins
                    .iter()
                    .position(|b| b.id == id)
                    .ok_or_else(|| ConstructionError::UnknownBasin {
                        turbine: turbine.id.clone(),
                        basin: id.to_string(),
                    })
            };
            let upstream = turbine.upstream_basin().map(resolve).transpose()?;
            let downstream = turbine.downstream_basin().map(resolve).transpose()?;

            if let (Some(u), Some(d)) = (upstream, downstream) {
                if u == d {
                    return Err(ConstructionError::SelfLoop {
                        turbine: turbine.id.clone(),
                        basin: self.basins[u].id.clone(),
                    });
                }
            }
            if turbine.generation.needs_head() && upstream.is_none() {
                return Err(ConstructionError::HeadWithoutBasin {
                    turbine: turbine.id.clone(),
                });
            }
            links.push(TurbineLinks { upstream, downstream });
        }

        debug!(
            basins = self.basins.len(),
            turbines = self.turbines.len(),
            "network built"
        );

        Ok(Network {
            basins: self.basins,
            turbines: self.turbines,
            links,
        })
    }
}

impl Network {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    pub fn basins(&self) -> &[Basin] {
        &self.basins
    }

    pub fn turbines(&self) -> &[Turbine] {
        &self.turbines
    }

    pub fn links(&self, turbine: usize) -> TurbineLinks {
        self.links[turbine]
    }

    pub fn basin_index(&self, id: &str) -> Option<usize> {
        self.basins.iter().position(|b| b.id == id)
    }

    pub fn turbine_index(&self, id: &str) -> Option<usize> {
        self.turbines.iter().position(|t| t.id == id)
    }

    pub fn initial_storages(&self) -> Vec<f64> {
        self.basins.iter().map(|b| b.initial_volume_m3).collect()
    }

    /// Gross head of a turbine at the given basin storages.
    pub fn head_m(&self, turbine: usize, storages: &[f64]) -> f64 {
        let links = self.links[turbine];
        let upper = links
            .upstream
            .map(|b| self.basins[b].level_at(storages[b]))
            .unwrap_or(0.0);
        let lower = match (&self.turbines[turbine].downstream, links.downstream) {
            (_, Some(b)) => self.basins[b].level_at(storages[b]),
            (Downstream::Sink { tailwater_level_m }, None) => *tailwater_level_m,
            (Downstream::Basin(_), None) => 0.0,
        };
        upper - lower
    }

    /// Sum of every basin's terminal value at the given storages.
    pub fn terminal_value(&self, storages: &[f64]) -> f64 {
        self.basins
            .iter()
            .zip(storages)
            .map(|(b, &s)| b.terminal.evaluate(s))
            .sum()
    }
}
