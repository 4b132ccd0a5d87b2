//! Block-level column copies.
//!
//! `save_blockwise` rewrites a column that may span many segment files into a
//! single new segment by copying encoded blocks verbatim. Nothing is decoded
//! or re-encoded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_codec::EncodedBlock;

use crate::block_store::BlockStore;
use crate::block_writer::BlockWriter;
use crate::column::ColumnArray;
use crate::error::Result;
use crate::index::{ColumnIndex, SegmentRef};

/// Destination of a block copy.
pub trait BlockSink {
    fn put_block(&mut self, block: EncodedBlock) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
    /// Discard everything written. Must not fail.
    fn abort(&mut self);
}

/// Sink writing every block into column 0 of one new segment file.
pub struct SegmentBlockSink {
    path: PathBuf,
    writer: BlockWriter,
    rows: u64,
}

impl SegmentBlockSink {
    pub fn create(store: &BlockStore, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let codec = store.writer_settings().codec;
        let writer = BlockWriter::create(store, vec![path.clone()], 1, codec)?;
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl BlockSink for SegmentBlockSink {
    fn put_block(&mut self, block: EncodedBlock) -> Result<()> {
        let info = self.writer.write_encoded(0, 0, block)?;
        self.rows += info.num_rows;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.close_segment(0)
    }

    fn abort(&mut self) {
        self.writer.abort();
    }
}

/// Copy every block of `column`, in row order, into `sink` and finish it.
///
/// On failure the sink is aborted and the error returned as is. Source
/// segments are closed on every path. Returns the number of blocks copied.
pub fn copy_blocks<S: BlockSink + ?Sized>(column: &ColumnArray, sink: &mut S) -> Result<u64> {
    match copy_into(column, sink) {
        Ok(n) => Ok(n),
        Err(e) => {
            sink.abort();
            Err(e)
        }
    }
}

fn copy_into<S: BlockSink + ?Sized>(column: &ColumnArray, sink: &mut S) -> Result<u64> {
    let store: &Arc<BlockStore> = column.store();
    let mut copied = 0u64;
    for seg in &column.get_index_info().segments {
        let handle = store.open_column_guard(&seg.file, seg.column)?;
        let n = handle.num_blocks()?;
        let mut addr = handle.address().block(0);
        while addr.block < n {
            let block = store.read_encoded_block(addr)?;
            sink.put_block(block)?;
            copied += 1;
            addr = addr.next();
        }
        handle.close();
    }
    sink.finish()?;
    Ok(copied)
}

/// Rewrite `column` into the single segment file `target` and return the
/// column array that reads from it.
pub fn save_blockwise(column: &ColumnArray, target: &Path) -> Result<ColumnArray> {
    let store = column.store();
    let mut sink = SegmentBlockSink::create(store, target)?;
    let blocks = copy_blocks(column, &mut sink)?;
    tracing::debug!(
        column = column.name(),
        target = %target.display(),
        blocks,
        rows = sink.rows(),
        "column consolidated"
    );
    let src = column.get_index_info();
    let index = ColumnIndex {
        name: src.name.clone(),
        data_type: src.data_type,
        num_rows: sink.rows(),
        segments: vec![SegmentRef {
            file: target.to_path_buf(),
            column: 0,
        }],
        segment_sizes: vec![sink.rows()],
        metadata: src.metadata.clone(),
    };
    ColumnArray::new(Arc::clone(store), index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use strata_core::config::EngineConfig;
    use strata_core::schema::DataType;
    use strata_core::types::Scalar;

    fn column(store: &Arc<BlockStore>, dir: &Path) -> ColumnArray {
        let mut w = ColumnArray::open_for_write(store, dir.join("src.sidx"), 3, DataType::Utf8).unwrap();
        for s in 0..3 {
            let mut out = w.output(s).unwrap();
            for i in 0..10 {
                out.write_value(Scalar::Str(format!("{s}-{i}"))).unwrap();
            }
            out.finish().unwrap();
        }
        w.close().unwrap()
    }

    fn cfg() -> EngineConfig {
        EngineConfig {
            target_block_bytes: 16,
            min_rows_per_block: 4,
            max_rows_per_block: 4,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn blockwise_copy_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(&cfg()).unwrap());
        let src = column(&store, dir.path());
        let dst = save_blockwise(&src, &dir.path().join("dst.0000")).unwrap();
        assert_eq!(dst.num_segments(), 1);
        assert_eq!(dst.len(), 30);
        assert_eq!(dst.to_vec().unwrap(), src.to_vec().unwrap());
        assert_eq!(store.stats().open_handles, 0);
    }

    struct FailingSink {
        after: usize,
        seen: usize,
        aborted: bool,
    }

    impl BlockSink for FailingSink {
        fn put_block(&mut self, _block: EncodedBlock) -> Result<()> {
            self.seen += 1;
            if self.seen > self.after {
                return Err(Error::Invalid("sink full".into()));
            }
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    #[test]
    fn sink_failure_aborts_and_closes_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(&cfg()).unwrap());
        let src = column(&store, dir.path());
        let before = store.stats();
        let mut sink = FailingSink {
            after: 4,
            seen: 0,
            aborted: false,
        };
        let err = copy_blocks(&src, &mut sink).unwrap_err();
        assert!(matches!(err, Error::Invalid(ref m) if m == "sink full"));
        assert!(sink.aborted);
        let after = store.stats();
        assert_eq!(after.open_handles, 0);
        assert_eq!(after.opens - before.opens, after.closes - before.closes);
    }
}
