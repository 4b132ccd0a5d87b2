#![forbid(unsafe_code)]
//! strata-operators: the Query Context protocol and the operators that run on
//! it.
//!
//! Operators are step machines. Each `execute` call pulls input through the
//! context and ends with one emitted block, one skipped placeholder or the
//! end of the stream. The executor in `strata-exec` owns the contexts and
//! decides which operator steps next.
//!
//! `aggregate` holds the per-group aggregation states used by the hash
//! group-by; it does not run on the step protocol.

pub mod aggregate;
pub mod binary;
pub mod context;
pub mod filter;
pub mod project;
pub mod source;
pub mod traits;
pub mod transform;
pub mod union;

pub use aggregate::{AggState, Aggregate, AggregateKind};
pub use binary::BinaryTransform;
pub use context::{
    ContextCore, ContextCounters, ContextState, Downstream, EmitState, NoUpstream, Pulled,
    QueryContext, StepOutcome, Upstream,
};
pub use filter::LogicalFilter;
pub use project::Project;
pub use source::{ConstantSource, RangeSource, TableSource};
pub use traits::{OpError, Operator, Result};
pub use transform::Transform;
pub use union::Union;
