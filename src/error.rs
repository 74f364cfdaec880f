use thiserror::Error;

/// Errors raised while building basins, turbines, constraint sets and scenarios.
///
/// These never reach the optimizer: a scenario that fails to build cannot be solved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("network must contain at least one basin")]
    EmptyNetwork,

    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("turbine '{turbine}' references unknown basin '{basin}'")]
    UnknownBasin { turbine: String, basin: String },

    #[error("turbine '{turbine}' connects basin '{basin}' to itself")]
    SelfLoop { turbine: String, basin: String },

    #[error("turbine '{turbine}' uses head-dependent generation but has no upstream basin")]
    HeadWithoutBasin { turbine: String },

    #[error("invalid bounds for {entity}: min {min} > max {max}")]
    InvalidBounds { entity: String, min: f64, max: f64 },

    #[error("non-finite or negative value for {field} of '{entity}': {value}")]
    InvalidValue {
        entity: String,
        field: &'static str,
        value: f64,
    },

    #[error("initial storage {value} of basin '{basin}' outside [{min}, {max}]")]
    InitialOutOfBounds {
        basin: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid level curve for basin '{basin}': {reason}")]
    InvalidLevelCurve { basin: String, reason: String },

    #[error("invalid generation model for turbine '{turbine}': {reason}")]
    InvalidGeneration { turbine: String, reason: String },

    #[error("horizon must contain at least one period")]
    EmptyHorizon,

    #[error("period {period} is invalid: {reason}")]
    InvalidPeriod { period: usize, reason: String },

    #[error("basin '{basin}' has {actual} inflow values, horizon has {expected} periods")]
    InflowLength {
        basin: String,
        expected: usize,
        actual: usize,
    },

    #[error("constraint set '{set}' references unknown {entity}")]
    UnknownEntity { set: String, entity: String },

    #[error("constraint set '{set}' targets period {period}, horizon has {horizon} periods")]
    PeriodOutOfRange {
        set: String,
        period: usize,
        horizon: usize,
    },

    #[error(
        "constraint set '{set}' override for {entity} at period {period} is infeasible: min {min} > max {max}"
    )]
    OverrideInfeasible {
        set: String,
        entity: String,
        period: usize,
        min: f64,
        max: f64,
    },

    #[error(
        "constraint set '{set}' override [{min}, {max}] for {entity} at period {period} widens the default bound [{default_min}, {default_max}]"
    )]
    OverrideOutsideDefault {
        set: String,
        entity: String,
        period: usize,
        min: f64,
        max: f64,
        default_min: f64,
        default_max: f64,
    },

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),
}

/// Errors raised by an optimization strategy or the forward simulator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    /// No decision keeps the system feasible. Points at a modeling or constraint-set error.
    #[error("infeasible scenario at period {period} (storages {storages:?}): {detail}")]
    Infeasible {
        period: usize,
        storages: Vec<f64>,
        detail: String,
    },

    /// A release path within every bound exists, but the storage grid is too
    /// coarse for the backward pass to find a feasible continuation.
    #[error(
        "no feasible continuation on the storage grid from period {period} (storages {storages:?})"
    )]
    GridTooCoarse { period: usize, storages: Vec<f64> },

    #[error("initial state has {actual} storages, network has {expected} basins")]
    InitialStateDimension { expected: usize, actual: usize },

    #[error("solution of scenario '{solution}' does not fit scenario '{scenario}': {reason}")]
    SolutionMismatch {
        solution: String,
        scenario: String,
        reason: String,
    },
}

/// Errors raised by the scenario comparator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompareError {
    #[error("variant '{variant}' is not comparable with the baseline: {reason}")]
    PreconditionMismatch { variant: String, reason: String },

    #[error("scenario '{scenario}' failed to optimize: {source}")]
    Optimize {
        scenario: String,
        #[source]
        source: OptimizeError,
    },
}

/// Crate-level error for callers that do not care which stage failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error(transparent)]
    Compare(#[from] CompareError),
}
