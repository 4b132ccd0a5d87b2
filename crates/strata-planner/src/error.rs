use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("length mismatch: {0}")]
    LengthMismatch(String),

    #[error("plan cannot run in one linear pass: {0}")]
    NotLinear(String),

    #[error(transparent)]
    Storage(#[from] strata_storage::Error),
}
