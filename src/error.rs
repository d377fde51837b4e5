use thiserror::Error;

/// Errors surfaced at stage boundaries. Solver non-convergence is not an
/// error; it is reported through [`crate::fdm::SolverStatus`] and logged.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Bad construction input: non-positive spacing, mismatched shapes,
    /// empty collider surface. Fatal, detected up front.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// NaN (or infinity) detected in velocity or SDF after a stage. The
    /// driver aborts the frame.
    #[error("invariant violation in stage '{stage}': {what}")]
    InvariantViolation { stage: &'static str, what: String },

    #[error("serialization: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;

impl SimulationError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SimulationError::InvalidConfiguration(msg.into())
    }
}
