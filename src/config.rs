use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_STORAGE_POINTS: usize = 21;
pub const DEFAULT_FLOW_LEVELS: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub optimizer: OptimizerConfig,
    pub telemetry: TelemetryConfig,
}

/// Tuning knobs for the DP optimizer, forward simulator and comparator.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OptimizerConfig {
    /// Storage grid points per basin when a scenario does not say otherwise.
    #[validate(range(min = 2))]
    pub default_storage_points: usize,
    /// Running flow levels per turbine when a scenario does not say otherwise.
    #[validate(range(min = 1))]
    pub default_flow_levels: usize,
    /// Evaluate grid states of a period (and comparator scenarios) on the rayon pool.
    pub parallel: bool,
    /// Relative value difference below which two decisions count as tied.
    #[validate(range(min = 0.0, max = 0.001))]
    pub tie_tolerance: f64,
    /// Relative gap between DP optimum and simulated value that triggers a diagnostic.
    #[validate(range(min = 0.0))]
    pub gap_warning_ratio: f64,
    /// Work estimate (state-decision evaluations) above which a warning is logged.
    #[validate(range(min = 1))]
    pub work_warning_evaluations: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_storage_points: DEFAULT_STORAGE_POINTS,
            default_flow_levels: DEFAULT_FLOW_LEVELS,
            parallel: true,
            tie_tolerance: 1e-9,
            gap_warning_ratio: 0.01,
            work_warning_evaluations: 500_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "info,hydro_dispatch_optimizer=info".to_string(),
            json: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config/default.toml")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HYDRO__").split("__"));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("invalid configuration")?;
        cfg.validate().context("configuration out of range")?;
        Ok(cfg)
    }
}
