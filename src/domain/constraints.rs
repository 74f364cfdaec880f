use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::network::Network;
use crate::error::ConstructionError;

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, x: f64, tolerance: f64) -> bool {
        x >= self.min - tolerance && x <= self.max + tolerance
    }

    pub fn is_within(&self, outer: &Bounds) -> bool {
        self.min >= outer.min && self.max <= outer.max
    }

    pub fn intersect(&self, other: &Bounds) -> Bounds {
        Bounds::new(self.min.max(other.min), self.max.min(other.max))
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// Thing a constraint applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Entity {
    TurbineFlow(String),
    BasinStorage(String),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::TurbineFlow(id) => write!(f, "flow of turbine '{id}'"),
            Entity::BasinStorage(id) => write!(f, "storage of basin '{id}'"),
        }
    }
}

/// A restriction of an entity's default bound for one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Override {
    Interval(Bounds),
    AtLeast { min: f64 },
    AtMost { max: f64 },
    /// Headroom kept free for ancillary services: `up` below the maximum and
    /// `down` above the minimum.
    Reserve { up: f64, down: f64 },
}

impl Override {
    /// The interval this override produces on top of `default`.
    pub fn resolve(&self, default: Bounds) -> Bounds {
        match *self {
            Override::Interval(b) => b,
            Override::AtLeast { min } => Bounds::new(min, default.max),
            Override::AtMost { max } => Bounds::new(default.min, max),
            Override::Reserve { up, down } => Bounds::new(default.min + down, default.max - up),
        }
    }

    fn is_well_formed(&self) -> bool {
        match *self {
            Override::Interval(b) => b.min.is_finite() && b.max.is_finite() && b.min <= b.max,
            Override::AtLeast { min } => min.is_finite(),
            Override::AtMost { max } => max.is_finite(),
            Override::Reserve { up, down } => {
                up.is_finite() && down.is_finite() && up >= 0.0 && down >= 0.0
            }
        }
    }
}

/// Named set of per-period overrides, layered onto the network's default bounds.
///
/// Several overrides on the same entity and period intersect.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstraintSet {
    name: String,
    overrides: BTreeMap<(Entity, usize), Vec<Override>>,
}

#[derive(Debug)]
pub struct ConstraintSetBuilder {
    set: ConstraintSet,
    error: Option<ConstructionError>,
}

impl ConstraintSetBuilder {
    pub fn add(
        mut self,
        entity: Entity,
        periods: impl IntoIterator<Item = usize>,
        ov: Override,
    ) -> Self {
        if self.error.is_none() && !ov.is_well_formed() {
            let (min, max) = match ov {
                Override::Interval(b) => (b.min, b.max),
                Override::AtLeast { min } => (min, f64::NAN),
                Override::AtMost { max } => (f64::NAN, max),
                Override::Reserve { up, down } => (down, up),
            };
            self.error = Some(ConstructionError::InvalidBounds {
                entity: format!("{entity} in constraint set '{}'", self.set.name),
                min,
                max,
            });
        }
        for period in periods {
            self.set
                .overrides
                .entry((entity.clone(), period))
                .or_default()
                .push(ov);
        }
        self
    }

    pub fn turbine_flow(
        self,
        turbine: &str,
        periods: impl IntoIterator<Item = usize>,
        bounds: Bounds,
    ) -> Self {
        self.add(Entity::TurbineFlow(turbine.to_string()), periods, Override::Interval(bounds))
    }

    /// Forced outage: the unit cannot release any water.
    pub fn outage(self, turbine: &str, periods: impl IntoIterator<Item = usize>) -> Self {
        self.turbine_flow(turbine, periods, Bounds::new(0.0, 0.0))
    }

    /// Pin the flow to an exact value.
    pub fn forced_flow(
        self,
        turbine: &str,
        periods: impl IntoIterator<Item = usize>,
        flow_m3s: f64,
    ) -> Self {
        self.turbine_flow(turbine, periods, Bounds::new(flow_m3s, flow_m3s))
    }

    pub fn min_flow(
        self,
        turbine: &str,
        periods: impl IntoIterator<Item = usize>,
        min: f64,
    ) -> Self {
        self.add(Entity::TurbineFlow(turbine.to_string()), periods, Override::AtLeast { min })
    }

    pub fn max_flow(
        self,
        turbine: &str,
        periods: impl IntoIterator<Item = usize>,
        max: f64,
    ) -> Self {
        self.add(Entity::TurbineFlow(turbine.to_string()), periods, Override::AtMost { max })
    }

    pub fn reserve_capacity(
        self,
        turbine: &str,
        periods: impl IntoIterator<Item = usize>,
        up_m3s: f64,
        down_m3s: f64,
    ) -> Self {
        self.add(
            Entity::TurbineFlow(turbine.to_string()),
            periods,
            Override::Reserve {
                up: up_m3s,
                down: down_m3s,
            },
        )
    }

    pub fn storage_band(
        self,
        basin: &str,
        periods: impl IntoIterator<Item = usize>,
        bounds: Bounds,
    ) -> Self {
        self.add(Entity::BasinStorage(basin.to_string()), periods, Override::Interval(bounds))
    }

    pub fn build(self) -> Result<ConstraintSet, ConstructionError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.set),
        }
    }
}

impl ConstraintSet {
    pub fn builder(name: impl Into<String>) -> ConstraintSetBuilder {
        ConstraintSetBuilder {
            set: ConstraintSet {
                name: name.into(),
                overrides: BTreeMap::new(),
            },
            error: None,
        }
    }

    /// Set without overrides, the usual baseline.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Check every override against the network and horizon, and resolve it to
    /// an index-addressed lookup table.
    pub fn resolve(
        &self,
        network: &Network,
        horizon_len: usize,
    ) -> Result<ActiveBounds, ConstructionError> {
        let mut turbine_flow = BTreeMap::new();
        let mut basin_storage = BTreeMap::new();

        for ((entity, period), overrides) in &self.overrides {
            if *period >= horizon_len {
                return Err(ConstructionError::PeriodOutOfRange {
                    set: self.name.clone(),
                    period: *period,
                    horizon: horizon_len,
                });
            }
            let unknown = || ConstructionError::UnknownEntity {
                set: self.name.clone(),
                entity: entity.to_string(),
            };
            let (index, default) = match entity {
                Entity::TurbineFlow(id) => {
                    let i = network.turbine_index(id).ok_or_else(unknown)?;
                    (i, ActiveBounds::default_flow(network, i))
                }
                Entity::BasinStorage(id) => {
                    let i = network.basin_index(id).ok_or_else(unknown)?;
                    (i, ActiveBounds::default_storage(network, i))
                }
            };

            let mut active = default;
            for ov in overrides {
                let resolved = ov.resolve(default);
                if resolved.min > resolved.max {
                    return Err(ConstructionError::OverrideInfeasible {
                        set: self.name.clone(),
                        entity: entity.to_string(),
                        period: *period,
                        min: resolved.min,
                        max: resolved.max,
                    });
                }
                if !resolved.is_within(&default) {
                    return Err(ConstructionError::OverrideOutsideDefault {
                        set: self.name.clone(),
                        entity: entity.to_string(),
                        period: *period,
                        min: resolved.min,
                        max: resolved.max,
                        default_min: default.min,
                        default_max: default.max,
                    });
                }
                active = active.intersect(&resolved);
            }
            if active.min > active.max {
                return Err(ConstructionError::OverrideInfeasible {
                    set: self.name.clone(),
                    entity: entity.to_string(),
                    period: *period,
                    min: active.min,
                    max: active.max,
                });
            }

            match entity {
                Entity::TurbineFlow(_) => turbine_flow.insert((index, *period), active),
                Entity::BasinStorage(_) => basin_storage.insert((index, *period), active),
            };
        }

        Ok(ActiveBounds {
            turbine_flow,
            basin_storage,
            default_flow: (0..network.turbines().len())
                .map(|i| ActiveBounds::default_flow(network, i))
                .collect(),
            default_storage: (0..network.basins().len())
                .map(|i| ActiveBounds::default_storage(network, i))
                .collect(),
        })
    }
}

/// Resolved overrides keyed by (entity index, period), falling back to the
/// network defaults on lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBounds {
    turbine_flow: BTreeMap<(usize, usize), Bounds>,
    basin_storage: BTreeMap<(usize, usize), Bounds>,
    default_flow: Vec<Bounds>,
    default_storage: Vec<Bounds>,
}

impl ActiveBounds {
    fn default_flow(network: &Network, turbine: usize) -> Bounds {
        Bounds::new(0.0, network.turbines()[turbine].max_flow_m3s)
    }

    fn default_storage(network: &Network, basin: usize) -> Bounds {
        let b = &network.basins()[basin];
        Bounds::new(b.min_volume_m3, b.max_volume_m3)
    }

    pub fn turbine_flow(&self, turbine: usize, period: usize) -> Bounds {
        self.turbine_flow
            .get(&(turbine, period))
            .copied()
            .unwrap_or(self.default_flow[turbine])
    }

    /// Endpoints of every flow override on `turbine`, over all periods.
    pub fn flow_endpoints(&self, turbine: usize) -> Vec<f64> {
        self.turbine_flow
            .range((turbine, 0)..(turbine + 1, 0))
            .flat_map(|(_, b)| [b.min, b.max])
            .collect()
    }

    pub fn basin_storage(&self, basin: usize, period: usize) -> Bounds {
        self.basin_storage
            .get(&(basin, period))
            .copied()
            .unwrap_or(self.default_storage[basin])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::basin::Basin;
    use crate::domain::turbine::{Downstream, GenerationModel, Turbine, Upstream};

    fn network() -> Network {
        Network::builder()
            .basin(Basin::new("upper", 0.0, 100.0, 50.0))
            .turbine(Turbine::new(
                "unit",
                Upstream::Basin("upper".to_string()),
                Downstream::Sink { tailwater_level_m: 0.0 },
                10.0,
                GenerationModel::Linear { mw_per_m3s: 1.0 },
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_falls_back_to_defaults() {
        let set = ConstraintSet::builder("outage")
            .outage("unit", 1..3)
            .build()
            .unwrap();
        let active = set.resolve(&network(), 4).unwrap();
        assert_eq!(active.turbine_flow(0, 0), Bounds::new(0.0, 10.0));
        assert_eq!(active.turbine_flow(0, 1), Bounds::new(0.0, 0.0));
        assert_eq!(active.turbine_flow(0, 2), Bounds::new(0.0, 0.0));
        assert_eq!(active.turbine_flow(0, 3), Bounds::new(0.0, 10.0));
        assert_eq!(active.basin_storage(0, 2), Bounds::new(0.0, 100.0));
    }

    #[test]
    fn test_forced_flow_pins_both_ends() {
        let set = ConstraintSet::builder("forced")
            .forced_flow("unit", [0, 2], 4.0)
            .build()
            .unwrap();
        assert_eq!(set.len(), 2);
        let active = set.resolve(&network(), 3).unwrap();
        assert_eq!(active.turbine_flow(0, 2), Bounds::new(4.0, 4.0));
        assert_eq!(active.turbine_flow(0, 1), Bounds::new(0.0, 10.0));
        assert_eq!(active.flow_endpoints(0), vec![4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_layered_overrides_intersect() {
        let set = ConstraintSet::builder("layered")
            .reserve_capacity("unit", [0], 2.0, 1.0)
            .max_flow("unit", [0], 6.0)
            .storage_band("upper", [0], Bounds::new(20.0, 80.0))
            .build()
            .unwrap();
        let active = set.resolve(&network(), 1).unwrap();
        assert_eq!(active.turbine_flow(0, 0), Bounds::new(1.0, 6.0));
        assert_eq!(active.basin_storage(0, 0), Bounds::new(20.0, 80.0));
    }

    #[test]
    fn test_rejects_inverted_interval_at_build() {
        let err = ConstraintSet::builder("bad")
            .turbine_flow("unit", [0], Bounds::new(5.0, 2.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidBounds { .. }));
    }

    #[test]
    fn test_rejects_overrides_that_cannot_hold() {
        let net = network();

        let set = ConstraintSet::builder("reserve")
            .reserve_capacity("unit", [0], 6.0, 6.0)
            .build()
            .unwrap();
        assert!(matches!(
            set.resolve(&net, 1),
            Err(ConstructionError::OverrideInfeasible { period: 0, .. })
        ));

        let set = ConstraintSet::builder("wide")
            .max_flow("unit", [0], 12.0)
            .build()
            .unwrap();
        assert!(matches!(
            set.resolve(&net, 1),
            Err(ConstructionError::OverrideOutsideDefault { .. })
        ));

        let set = ConstraintSet::builder("late").outage("unit", [5]).build().unwrap();
        assert!(matches!(
            set.resolve(&net, 2),
            Err(ConstructionError::PeriodOutOfRange { period: 5, .. })
        ));

        let set = ConstraintSet::builder("ghost").outage("nope", [0]).build().unwrap();
        assert!(matches!(
            set.resolve(&net, 1),
            Err(ConstructionError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_disjoint_layers_are_infeasible() {
        let set = ConstraintSet::builder("disjoint")
            .min_flow("unit", [0], 8.0)
            .max_flow("unit", [0], 3.0)
            .build()
            .unwrap();
        assert!(matches!(
            set.resolve(&network(), 1),
            Err(ConstructionError::OverrideInfeasible { .. })
        ));
    }
}
