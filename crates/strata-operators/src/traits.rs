//! Operator trait and the operator error type.
//!
//! The executor calls `execute` once per step. A step pulls whatever input it
//! needs through the `QueryContext` and ends with exactly one of `emit`,
//! `emit_skipped` or `finish`.

use thiserror::Error;

use crate::context::QueryContext;

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Storage(#[from] strata_storage::Error),

    #[error("query context protocol violation: {0}")]
    Protocol(String),

    #[error("planning error: {0}")]
    Plan(String),

    #[error("execution error: {0}")]
    Exec(String),
}

impl From<strata_core::Error> for OpError {
    fn from(e: strata_core::Error) -> Self {
        OpError::Exec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OpError>;

/// One running operator instance of one segment.
///
/// Instances are never shared between threads while running, but a segment
/// pipeline may be built on one thread and run on another.
pub trait Operator: Send {
    /// Stable operator name, used in logs.
    fn name(&self) -> &'static str;

    fn num_inputs(&self) -> usize;

    /// Perform one step.
    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()>;
}
