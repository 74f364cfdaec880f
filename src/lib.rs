//! Hydro power dispatch optimization.
//!
//! A [`Network`](domain::Network) of basins and turbines, a price
//! [`Horizon`](domain::Horizon) and a [`ConstraintSet`](domain::ConstraintSet)
//! form a [`Scenario`](domain::Scenario). The
//! [`DynamicProgrammingOptimizer`](optimizer::DynamicProgrammingOptimizer) solves it
//! by backward induction over a storage grid, and the
//! [`ScenarioComparator`](optimizer::ScenarioComparator) reports what a constraint
//! such as an outage costs relative to the unconstrained baseline.

pub mod config;
pub mod domain;
pub mod error;
pub mod optimizer;
pub mod telemetry;

pub use error::{CompareError, ConstructionError, Error, OptimizeError};
