use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::constraints::{ActiveBounds, ConstraintSet};
use super::horizon::Horizon;
use super::network::Network;
use crate::config::{OptimizerConfig, DEFAULT_FLOW_LEVELS, DEFAULT_STORAGE_POINTS};
use crate::error::ConstructionError;

/// How finely storage and flow are discretized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Grid points per basin, in network order.
    pub storage_points: Vec<usize>,
    /// Running flow levels per turbine (standing still is always added).
    pub flow_levels: usize,
}

impl Resolution {
    pub fn uniform(basins: usize, storage_points: usize, flow_levels: usize) -> Self {
        Self {
            storage_points: vec![storage_points; basins],
            flow_levels,
        }
    }

    fn validate(&self, network: &Network) -> Result<(), ConstructionError> {
        if self.storage_points.len() != network.basins().len() {
            return Err(ConstructionError::InvalidResolution(format!(
                "{} storage point counts for {} basins",
                self.storage_points.len(),
                network.basins().len()
            )));
        }
        if let Some((basin, n)) = network
            .basins()
            .iter()
            .zip(&self.storage_points)
            .find(|(_, n)| **n < 2)
        {
            return Err(ConstructionError::InvalidResolution(format!(
                "basin '{}' needs at least 2 storage points, got {n}",
                basin.id
            )));
        }
        if self.flow_levels == 0 {
            return Err(ConstructionError::InvalidResolution(
                "flow_levels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One complete, immutable optimization problem.
///
/// The network is shared between a baseline and its variants.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    network: Arc<Network>,
    horizon: Arc<Horizon>,
    constraints: ConstraintSet,
    active: ActiveBounds,
    resolution: Resolution,
    initial_storages: Vec<f64>,
    /// Additional candidate flows per turbine, in network order.
    extra_flows: Vec<Vec<f64>>,
}

#[derive(Debug)]
pub struct ScenarioBuilder {
    name: String,
    network: Arc<Network>,
    horizon: Arc<Horizon>,
    constraints: Option<ConstraintSet>,
    storage_points: BTreeMap<String, usize>,
    default_storage_points: usize,
    flow_levels: usize,
    initial_storages: BTreeMap<String, f64>,
    extra_flows: BTreeMap<String, Vec<f64>>,
}

impl ScenarioBuilder {
    pub fn constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Take the default grid and flow resolution from the optimizer configuration.
    pub fn config_defaults(mut self, config: &OptimizerConfig) -> Self {
        self.default_storage_points = config.default_storage_points;
        self.flow_levels = config.default_flow_levels;
        self
    }

    /// Grid points for every basin without an explicit count.
    pub fn default_storage_points(mut self, points: usize) -> Self {
        self.default_storage_points = points;
        self
    }

    pub fn storage_points(mut self, basin: &str, points: usize) -> Self {
        self.storage_points.insert(basin.to_string(), points);
        self
    }

    pub fn flow_levels(mut self, levels: usize) -> Self {
        self.flow_levels = levels;
        self
    }

    /// Start this scenario from a storage other than the basin's own initial volume.
    pub fn initial_storage(mut self, basin: &str, volume_m3: f64) -> Self {
        self.initial_storages.insert(basin.to_string(), volume_m3);
        self
    }

    /// Offer `flows` to the optimizer as decisions for `turbine` on top of its
    /// running levels.
    pub fn extra_flows(mut self, turbine: &str, flows: impl IntoIterator<Item = f64>) -> Self {
        self.extra_flows
            .entry(turbine.to_string())
            .or_default()
            .extend(flows);
        self
    }

    pub fn build(self) -> Result<Scenario, ConstructionError> {
        let network = &self.network;
        let periods = self.horizon.len();

        for basin in network.basins() {
            if basin.inflow_m3s.len() != periods {
                return Err(ConstructionError::InflowLength {
                    basin: basin.id.clone(),
                    expected: periods,
                    actual: basin.inflow_m3s.len(),
                });
            }
        }

        for id in self.storage_points.keys().chain(self.initial_storages.keys()) {
            if network.basin_index(id).is_none() {
                return Err(ConstructionError::InvalidResolution(format!(
                    "unknown basin '{id}'"
                )));
            }
        }

        let resolution = Resolution {
            storage_points: network
                .basins()
                .iter()
                .map(|b| {
                    self.storage_points
                        .get(&b.id)
                        .copied()
                        .unwrap_or(self.default_storage_points)
                })
                .collect(),
            flow_levels: self.flow_levels,
        };
        resolution.validate(network)?;

        let mut extra_flows = vec![Vec::new(); network.turbines().len()];
        for (id, flows) in &self.extra_flows {
            let Some(i) = network.turbine_index(id) else {
                return Err(ConstructionError::InvalidResolution(format!(
                    "unknown turbine '{id}'"
                )));
            };
            let max = network.turbines()[i].max_flow_m3s;
            if let Some(&q) = flows.iter().find(|q| !q.is_finite() || **q < 0.0 || **q > max) {
                return Err(ConstructionError::InvalidValue {
                    entity: id.clone(),
                    field: "extra_flows",
                    value: q,
                });
            }
            extra_flows[i] = flows.clone();
        }

        let mut initial_storages = network.initial_storages();
        for (id, &volume) in &self.initial_storages {
            // validated above
            let Some(i) = network.basin_index(id) else { continue };
            let basin = &network.basins()[i];
            if !volume.is_finite() || volume < basin.min_volume_m3 || volume > basin.max_volume_m3 {
                return Err(ConstructionError::InitialOutOfBounds {
                    basin: id.clone(),
                    value: volume,
                    min: basin.min_volume_m3,
                    max: basin.max_volume_m3,
                });
            }
            initial_storages[i] = volume;
        }

        let constraints = self
            .constraints
            .unwrap_or_else(|| ConstraintSet::empty("baseline"));
        let active = constraints.resolve(network, periods)?;

        Ok(Scenario {
            name: self.name,
            network: self.network,
            horizon: self.horizon,
            constraints,
            active,
            resolution,
            initial_storages,
            extra_flows,
        })
    }
}

impl Scenario {
    pub fn builder(
        name: impl Into<String>,
        network: Arc<Network>,
        horizon: Horizon,
    ) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            network,
            horizon: Arc::new(horizon),
            constraints: None,
            storage_points: BTreeMap::new(),
            default_storage_points: DEFAULT_STORAGE_POINTS,
            flow_levels: DEFAULT_FLOW_LEVELS,
            initial_storages: BTreeMap::new(),
            extra_flows: BTreeMap::new(),
        }
    }

    /// A variant sharing this scenario's network, horizon, resolution and
    /// initial state, differing only in its constraint set.
    pub fn with_constraints(
        &self,
        name: impl Into<String>,
        constraints: ConstraintSet,
    ) -> Result<Scenario, ConstructionError> {
        let active = constraints.resolve(&self.network, self.horizon.len())?;
        Ok(Scenario {
            name: name.into(),
            network: Arc::clone(&self.network),
            horizon: Arc::clone(&self.horizon),
            constraints,
            active,
            resolution: self.resolution.clone(),
            initial_storages: self.initial_storages.clone(),
            extra_flows: self.extra_flows.clone(),
        })
    }

    /// Same problem with `flows[i]` added to the candidate flows of turbine `i`.
    pub(crate) fn with_extra_flows(&self, flows: &[Vec<f64>]) -> Scenario {
        let extra_flows = self
            .extra_flows
            .iter()
            .zip(flows)
            .map(|(own, added)| own.iter().chain(added).copied().collect())
            .collect();
        Scenario {
            extra_flows,
            ..self.clone()
        }
    }

    /// Same problem at a different discretization.
    pub fn with_resolution(&self, resolution: Resolution) -> Result<Scenario, ConstructionError> {
        resolution.validate(&self.network)?;
        Ok(Scenario {
            resolution,
            ..self.clone()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn shares_network_with(&self, other: &Scenario) -> bool {
        Arc::ptr_eq(&self.network, &other.network) || self.network == other.network
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn active_bounds(&self) -> &ActiveBounds {
        &self.active
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn initial_storages(&self) -> &[f64] {
        &self.initial_storages
    }

    /// Flows the optimizer may choose for `turbine`, ascending.
    ///
    /// Standing still and the running levels, plus the extra flows and the
    /// endpoints of this scenario's own flow overrides. Points between standing
    /// still and the minimum stable flow are left out.
    pub fn flow_lattice(&self, turbine: usize) -> Vec<f64> {
        let unit = &self.network.turbines()[turbine];
        let tol = 1e-9 * unit.max_flow_m3s.max(1.0);
        let operable = |q: &f64| {
            *q <= tol || (*q >= unit.min_stable_flow_m3s - tol && *q <= unit.max_flow_m3s + tol)
        };
        unit.flow_lattice(self.resolution.flow_levels)
            .into_iter()
            .chain(self.extra_flows[turbine].iter().copied())
            .chain(self.active.flow_endpoints(turbine))
            .filter(operable)
            .sorted_by(f64::total_cmp)
            .dedup_by(|a, b| (a - b).abs() <= tol)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::basin::Basin;
    use crate::domain::turbine::{Downstream, GenerationModel, Turbine, Upstream};
    use chrono::DateTime;

    fn network(periods: usize) -> Arc<Network> {
        Arc::new(
            Network::builder()
                .basin(Basin::new("upper", 0.0, 3600.0, 3600.0).with_constant_inflow(0.0, periods))
                .turbine(Turbine::new(
                    "unit",
                    Upstream::Basin("upper".to_string()),
                    Downstream::Sink { tailwater_level_m: 0.0 },
                    1.0,
                    GenerationModel::Linear { mw_per_m3s: 1.0 },
                ))
                .build()
                .unwrap(),
        )
    }

    fn horizon(prices: &[f64]) -> Horizon {
        let start = DateTime::parse_from_rfc3339("2020-04-01T00:00:00+00:00").unwrap();
        Horizon::hourly(start, prices).unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let scenario = Scenario::builder("base", network(2), horizon(&[10.0, 30.0]))
            .build()
            .unwrap();
        assert_eq!(scenario.name(), "base");
        assert_eq!(scenario.constraints().name(), "baseline");
        assert_eq!(
            scenario.resolution(),
            &Resolution::uniform(1, DEFAULT_STORAGE_POINTS, DEFAULT_FLOW_LEVELS)
        );
        assert_eq!(scenario.initial_storages(), &[3600.0]);
    }

    #[test]
    fn test_inflow_must_cover_horizon() {
        let err = Scenario::builder("base", network(1), horizon(&[10.0, 30.0]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::InflowLength {
                basin: "upper".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_rejects_bad_resolution_and_initial_state() {
        let err = Scenario::builder("base", network(2), horizon(&[10.0, 30.0]))
            .storage_points("upper", 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidResolution(_)));

        let err = Scenario::builder("base", network(2), horizon(&[10.0, 30.0]))
            .initial_storage("upper", 4000.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InitialOutOfBounds { .. }));
    }

    #[test]
    fn test_variants_share_the_network() {
        let base = Scenario::builder("base", network(2), horizon(&[10.0, 30.0]))
            .storage_points("upper", 3)
            .initial_storage("upper", 1800.0)
            .build()
            .unwrap();
        let outage = ConstraintSet::builder("outage").outage("unit", [1]).build().unwrap();
        let variant = base.with_constraints("outage", outage).unwrap();

        assert!(variant.shares_network_with(&base));
        assert_eq!(variant.resolution(), base.resolution());
        assert_eq!(variant.initial_storages(), &[1800.0]);
        assert_eq!(variant.active_bounds().turbine_flow(0, 1).max, 0.0);
        assert_eq!(base.active_bounds().turbine_flow(0, 1).max, 1.0);
    }

    #[test]
    fn test_flow_lattice_includes_extra_flows_and_override_endpoints() {
        let base = Scenario::builder("base", network(2), horizon(&[10.0, 30.0]))
            .flow_levels(1)
            .extra_flows("unit", [0.25])
            .build()
            .unwrap();
        assert_eq!(base.flow_lattice(0), vec![0.0, 0.25, 1.0]);

        let forced = ConstraintSet::builder("forced")
            .forced_flow("unit", [0], 0.5)
            .build()
            .unwrap();
        let variant = base.with_constraints("forced", forced).unwrap();
        assert_eq!(variant.flow_lattice(0), vec![0.0, 0.25, 0.5, 1.0]);

        let shared = base.with_extra_flows(&[variant.flow_lattice(0)]);
        assert_eq!(shared.flow_lattice(0), variant.flow_lattice(0));
    }

    #[test]
    fn test_rejects_extra_flows_outside_capacity() {
        let err = Scenario::builder("base", network(2), horizon(&[10.0, 30.0]))
            .extra_flows("unit", [1.5])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidValue { field: "extra_flows", .. }));

        let err = Scenario::builder("base", network(2), horizon(&[10.0, 30.0]))
            .extra_flows("pump", [0.5])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidResolution(_)));
    }
}
