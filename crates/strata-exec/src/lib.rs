#![forbid(unsafe_code)]
//! strata-exec: turns lazy operator graphs into tables.
//!
//! - `engine`: `Engine` with `materialize`, slicing, length tests and
//!   table opening
//! - `pipeline`: per-segment pull-driven operator execution
//! - `naive`: node-by-node materialization used for cross-checking
//! - `shuffle`: hash partitioning through buffered writers
//! - `groupby`, `join`: group-by aggregation and equi-joins over hash
//!   partitioned buckets
//! - `scheduler`: the worker pool
//! - `metrics`: timing events

pub mod engine;
pub mod error;
mod groupby;
mod join;
pub mod metrics;
mod naive;
pub mod options;
pub mod pipeline;
mod scheduler;
mod shuffle;

pub use engine::Engine;
pub use error::{ExecError, Result};
pub use join::JoinKind;
pub use options::{MaterializeOptions, WriteCallback};
pub use pipeline::SegmentStats;
pub use strata_operators::{Aggregate, AggregateKind};
