//! Two basins in cascade draining into a river at 600 m, optimized over two days
//! of hourly prices and compared against an outage and a reserve variant.
//!
//! Run with `cargo run --example two_basin_cascade`.

use std::f64::consts::PI;
use std::sync::Arc;

use anyhow::Result;
use chrono::DateTime;
use hydro_dispatch_optimizer::config::Config;
use hydro_dispatch_optimizer::domain::{
    Basin, ConstraintSet, Downstream, GenerationModel, Horizon, LevelCurve, Network, Scenario,
    Turbine, Upstream,
};
use hydro_dispatch_optimizer::optimizer::{DynamicProgrammingOptimizer, ScenarioComparator};
use hydro_dispatch_optimizer::telemetry::init_tracing;
use tracing::info;

const HOURS: usize = 48;

fn main() -> Result<()> {
    let cfg = Config::load()?;
    init_tracing(&cfg.telemetry);

    let network = Network::builder()
        .basin(
            Basin::new("basin_1", 0.0, 81.0 * 3600.0, 10.0 * 3600.0)
                .with_constant_inflow(0.8, HOURS)
                .with_level_curve(LevelCurve::Wedge {
                    empty_m: 2000.0,
                    full_m: 2120.0,
                }),
        )
        .basin(
            Basin::new("basin_2", 0.0, 31.0 * 3600.0, 10.0 * 3600.0)
                .with_constant_inflow(0.8, HOURS)
                .with_level_curve(LevelCurve::Wedge {
                    empty_m: 1200.0,
                    full_m: 1250.0,
                }),
        )
        .turbine(
            Turbine::new(
                "turbine_1",
                Upstream::Basin("basin_1".to_string()),
                Downstream::Basin("basin_2".to_string()),
                5.0,
                GenerationModel::Hydraulic { efficiency: 0.8 },
            )
            .with_min_stable_flow(1.5),
        )
        .turbine(
            Turbine::new(
                "turbine_2",
                Upstream::Basin("basin_2".to_string()),
                Downstream::Sink { tailwater_level_m: 600.0 },
                3.0,
                GenerationModel::Hydraulic { efficiency: 0.8 },
            )
            .with_min_stable_flow(1.4),
        )
        .build()?;

    let prices: Vec<f64> = (0..HOURS)
        .map(|t| 10.0 * ((2.0 * PI * 2.0 * t as f64 / HOURS as f64).sin() + 1.0))
        .collect();
    let start = DateTime::parse_from_rfc3339("2020-04-01T00:00:00+00:00")?;
    let horizon = Horizon::hourly(start, &prices)?;

    let baseline = Scenario::builder("base", Arc::new(network), horizon)
        .config_defaults(&cfg.optimizer)
        .storage_points("basin_1", 41)
        .storage_points("basin_2", 21)
        .flow_levels(3)
        .build()?;

    let outage = baseline.with_constraints(
        "turbine_1_outage",
        ConstraintSet::builder("turbine_1_outage")
            .outage("turbine_1", 6..12)
            .build()?,
    )?;
    let reserve = baseline.with_constraints(
        "turbine_2_reserve",
        ConstraintSet::builder("turbine_2_reserve")
            .reserve_capacity("turbine_2", 0..24, 1.0, 0.0)
            .build()?,
    )?;

    let optimizer = DynamicProgrammingOptimizer::new(cfg.optimizer.clone());
    info!(work = ?optimizer.estimate_work(&baseline), "baseline size");

    let comparison = ScenarioComparator::new(optimizer)
        .with_parallel(cfg.optimizer.parallel)
        .compare(&baseline, &[outage, reserve])?;

    let base = &comparison.baseline;
    println!(
        "baseline: value {:.2}, realized {:.2}, energy {:.1} MWh",
        base.total_value,
        base.realized_value(),
        base.trajectory.total_energy_mwh()
    );
    for step in &base.trajectory.steps {
        println!(
            "{:>2} {} price {:>5.2} flows {:?} storages {:?}",
            step.period,
            step.time_start.format("%d %H:%M"),
            prices[step.period],
            step.flows_m3s,
            step.storage_after_m3
                .iter()
                .map(|v| (v / 3600.0 * 10.0).round() / 10.0)
                .collect::<Vec<_>>(),
        );
    }
    for (name, cost) in &comparison.costs {
        println!(
            "{name}: value {:.2}, opportunity cost {:.2} ({:.1}%)",
            cost.variant_value,
            cost.opportunity_cost,
            cost.relative() * 100.0
        );
    }
    for diagnostic in &base.diagnostics {
        println!("{}: {}", diagnostic.kind, diagnostic.message);
    }
    Ok(())
}
