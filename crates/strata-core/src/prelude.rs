//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{NodeId, SegmentId};
pub use crate::ops::BinaryOp;
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{RowBatch, RowFn, Scalar};
