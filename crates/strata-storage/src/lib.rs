#![forbid(unsafe_code)]
//! strata-storage: segmented block storage and the table abstraction.
//!
//! - `block_store`: column handles (refcounted, LRU-warm), block reads through
//!   a shared byte-bounded cache, RAII `ColumnHandle`
//! - `block_writer`: per-segment block appends with running offsets
//! - `segment`: segment file trailer/footer layout
//! - `index`: JSON table index (`.sidx`)
//! - `column` / `table`: `ColumnArray`, `ColumnReader`, `Table`, `TableReader`
//! - `table_writer`: `TableWriter` and per-segment `SegmentOutput`s
//! - `consolidate`: `save_blockwise` block copies
//! - `buffered`: `BufferedWriter` over a shared locked sink
//! - `import`: CSV import into a new table
//! - `temp`: file cleanup for temporary tables

pub mod block_cache;
pub mod block_store;
pub mod block_writer;
pub mod buffered;
pub mod column;
pub mod consolidate;
pub mod error;
pub mod import;
pub mod index;
pub mod segment;
pub mod table;
pub mod table_writer;
mod temp;

pub use block_store::{BlockAddress, BlockStore, ColumnAddress, ColumnHandle, StoreStats};
pub use block_writer::BlockWriter;
pub use buffered::{BufferedWriter, RowSink};
pub use column::{ColumnArray, ColumnReader, ColumnWriter};
pub use consolidate::{copy_blocks, save_blockwise, BlockSink, SegmentBlockSink};
pub use error::{Error, Result};
pub use index::{ColumnIndex, SegmentRef, TableIndex};
pub use table::{Table, TableReader};
pub use table_writer::{FlushPolicy, SegmentOutput, TableWriter};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, reporting poisoning as an error instead of panicking.
pub(crate) fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    m.lock()
        .map_err(|_| Error::Invariant(format!("{what} lock poisoned")))
}
