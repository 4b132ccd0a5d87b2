use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Plan(#[from] strata_planner::PlanError),

    #[error(transparent)]
    Operator(#[from] strata_operators::OpError),

    #[error(transparent)]
    Storage(#[from] strata_storage::Error),

    #[error(transparent)]
    Io(#[from] strata_io::Error),

    #[error(transparent)]
    Core(#[from] strata_core::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}
