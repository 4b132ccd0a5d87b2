//! strata-core: shared vocabulary of the strata engine.
//!
//! - `types`: `Scalar` values, the column-major `RowBatch`, and row functions
//! - `schema`: `DataType`, `Field`, `Schema`
//! - `id`: strongly-typed identifiers (segments, graph nodes)
//! - `config`: `EngineConfig` with env overrides
//! - `hash`: blake3 helpers used for block checksums and row partitioning
//! - `ops`: element-wise binary operators over scalars
//!
//! Nothing in here touches the filesystem or spawns threads.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod ops;
pub mod prelude;
pub mod schema;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use ops::BinaryOp;
pub use schema::{DataType, Field, Schema};
pub use types::{RowBatch, RowFn, Scalar};
