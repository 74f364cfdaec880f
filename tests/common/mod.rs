#![allow(dead_code)]
//! Shared fixtures for the integration tests.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use hydro_dispatch_optimizer::config::OptimizerConfig;
use hydro_dispatch_optimizer::domain::{
    Basin, Downstream, GenerationModel, Horizon, Network, Scenario, Turbine, Upstream,
};
use hydro_dispatch_optimizer::optimizer::DynamicProgrammingOptimizer;

pub fn start() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2020-04-01T00:00:00+00:00").unwrap()
}

pub fn horizon(prices: &[f64]) -> Horizon {
    Horizon::hourly(start(), prices).unwrap()
}

pub fn sequential() -> DynamicProgrammingOptimizer {
    DynamicProgrammingOptimizer::new(OptimizerConfig {
        parallel: false,
        ..OptimizerConfig::default()
    })
}

/// One basin draining through a 1 m³/s unit producing 1 MW per m³/s.
pub fn single_basin(prices: &[f64], max_volume_m3: f64, storage_points: usize) -> Scenario {
    let network = Network::builder()
        .basin(
            Basin::new("upper", 0.0, max_volume_m3, max_volume_m3)
                .with_constant_inflow(0.0, prices.len()),
        )
        .turbine(Turbine::new(
            "unit",
            Upstream::Basin("upper".to_string()),
            Downstream::Sink { tailwater_level_m: 0.0 },
            1.0,
            GenerationModel::Linear { mw_per_m3s: 1.0 },
        ))
        .build()
        .unwrap();
    Scenario::builder("single", Arc::new(network), horizon(prices))
        .default_storage_points(storage_points)
        .flow_levels(3)
        .build()
        .unwrap()
}

/// Upper basin feeding a lower basin, both with a spillway to the river.
pub fn cascade_network(periods: usize, inflow_m3s: f64) -> Arc<Network> {
    Arc::new(
        Network::builder()
            .basin(
                Basin::new("upper", 0.0, 36_000.0, 18_000.0)
                    .with_constant_inflow(inflow_m3s, periods),
            )
            .basin(
                Basin::new("lower", 0.0, 36_000.0, 9_000.0)
                    .with_constant_inflow(inflow_m3s, periods),
            )
            .turbine(Turbine::new(
                "t1",
                Upstream::Basin("upper".to_string()),
                Downstream::Basin("lower".to_string()),
                1.0,
                GenerationModel::Linear { mw_per_m3s: 2.0 },
            ))
            .turbine(Turbine::new(
                "t2",
                Upstream::Basin("lower".to_string()),
                Downstream::Sink { tailwater_level_m: 0.0 },
                1.0,
                GenerationModel::Linear { mw_per_m3s: 1.5 },
            ))
            .turbine(
                Turbine::spillway(
                    "spill1",
                    Upstream::Basin("upper".to_string()),
                    Downstream::Sink { tailwater_level_m: 0.0 },
                    2.0,
                )
                .with_release_penalty(0.001),
            )
            .turbine(
                Turbine::spillway(
                    "spill2",
                    Upstream::Basin("lower".to_string()),
                    Downstream::Sink { tailwater_level_m: 0.0 },
                    2.0,
                )
                .with_release_penalty(0.001),
            )
            .build()
            .unwrap(),
    )
}

pub fn cascade(prices: &[f64], inflow_m3s: f64, storage_points: usize) -> Scenario {
    Scenario::builder("cascade", cascade_network(prices.len(), inflow_m3s), horizon(prices))
        .default_storage_points(storage_points)
        .flow_levels(3)
        .build()
        .unwrap()
}
