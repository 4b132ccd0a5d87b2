#![forbid(unsafe_code)]
//! strata-io: file-level plumbing beneath the block store.
//!
//! - `segment_file`: append-only segment sink with running offsets, ranged reads
//! - `file_cache`: the download-cache collaborator (`get_local_path` / `release`)
//! - `csv_reader`: streaming CSV reader producing typed `RowBatch`es

pub mod csv_reader;
pub mod error;
pub mod file_cache;
pub mod segment_file;

pub use csv_reader::CsvReader;
pub use error::{Error, Result};
pub use file_cache::{FileCache, LocalFileCache};
pub use segment_file::{file_size, read_range, remove_if_exists, SegmentSink};

