use thiserror::Error;

/// Result type for crate-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A malformed or ambiguous netlist, reported with its 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Errors raised while rewriting a netlist with a parameter vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetlistError {
    #[error("netlist parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("parameter '{name}' has non-finite value {value}")]
    NonFiniteValue { name: String, value: f64 },
}

/// An invalid run configuration, rejected before any simulation starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field}: stop ({stop}) must be greater than start ({start})")]
    EmptyRange {
        field: &'static str,
        start: f64,
        stop: f64,
    },

    #[error("{field} must be finite and positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be finite and non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("sweep point count must be at least 1")]
    NoSweepPoints,

    #[error("invalid bounds for '{name}': lower {lower} > upper {upper}")]
    InvertedBounds { name: String, lower: f64, upper: f64 },

    #[error("parameter '{name}' value {value} lies outside [{lower}, {upper}]")]
    OutOfBounds {
        name: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("target curve: {0}")]
    InvalidTarget(String),

    #[error("unsupported output expression '{0}'")]
    InvalidProbe(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("no parameters selected for optimization")]
    NoParameters,

    #[error("noise input source '{0}' not found in netlist")]
    UnknownSource(String),

    #[error("constraint relation: {0}")]
    InvalidRelation(String),

    #[error("invalid configuration: {0}")]
    Json(String),
}

/// Failure of a single simulator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// Executable missing, or it exited unexpectedly before producing output.
    #[error("simulator launch failure: {0}")]
    LaunchFailure(String),

    /// The simulator ran but did not converge (or did not finish in time).
    #[error("simulator convergence failure: {0}")]
    ConvergenceFailure(String),

    /// The result file is missing or lacks the expected columns.
    #[error("simulator output parse failure: {0}")]
    OutputParseFailure(String),
}

/// Discriminant of a [`SimulationError`], used for failure accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SimulationFailureKind {
    Launch,
    Convergence,
    OutputParse,
}

impl SimulationError {
    pub fn kind(&self) -> SimulationFailureKind {
        match self {
            Self::LaunchFailure(_) => SimulationFailureKind::Launch,
            Self::ConvergenceFailure(_) => SimulationFailureKind::Convergence,
            Self::OutputParseFailure(_) => SimulationFailureKind::OutputParse,
        }
    }
}

/// Top-level error for workspace and controller operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Netlist(#[from] NetlistError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("no netlist uploaded")]
    NoNetlist,

    #[error("an optimization run is already active")]
    RunActive,

    #[error("run is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
