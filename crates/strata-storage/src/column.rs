//! Column arrays: a typed, segmented sequence of values on disk.

use std::path::PathBuf;
use std::sync::Arc;

use strata_core::schema::DataType;
use strata_core::types::Scalar;

use crate::block_store::{BlockAddress, BlockStore, ColumnHandle};
use crate::error::{Error, Result};
use crate::index::ColumnIndex;
use crate::table::Table;
use crate::table_writer::{SegmentOutput, TableWriter};
use crate::temp::TempFiles;

/// Immutable handle on a column stored in segment files. Cloning is cheap.
#[derive(Clone)]
pub struct ColumnArray {
    store: Arc<BlockStore>,
    index: Arc<ColumnIndex>,
    /// Temporary files this column reads from; kept alive by every clone.
    temp: Vec<Arc<TempFiles>>,
}

impl ColumnArray {
    pub fn new(store: Arc<BlockStore>, index: ColumnIndex) -> Result<Self> {
        index.validate()?;
        Ok(Self {
            store,
            index: Arc::new(index),
            temp: Vec::new(),
        })
    }

    /// Zero-row column with no segments.
    pub fn empty(store: Arc<BlockStore>, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            store,
            index: Arc::new(ColumnIndex {
                name: name.into(),
                data_type,
                num_rows: 0,
                segments: Vec::new(),
                segment_sizes: Vec::new(),
                metadata: Default::default(),
            }),
            temp: Vec::new(),
        }
    }

    /// Start writing a single-column array with `num_segments` outputs.
    pub fn open_for_write(
        store: &Arc<BlockStore>,
        index_path: impl Into<PathBuf>,
        num_segments: usize,
        data_type: DataType,
    ) -> Result<ColumnWriter> {
        let index_path = index_path.into();
        let name = index_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "X1".to_string());
        let inner = TableWriter::open_for_write(store, index_path, vec![name], vec![data_type], num_segments)?;
        Ok(ColumnWriter { inner })
    }

    pub fn name(&self) -> &str {
        &self.index.name
    }

    pub fn data_type(&self) -> DataType {
        self.index.data_type
    }

    pub fn len(&self) -> u64 {
        self.index.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.index.num_rows == 0
    }

    pub fn num_segments(&self) -> usize {
        self.index.segments.len()
    }

    pub fn segment_sizes(&self) -> &[u64] {
        &self.index.segment_sizes
    }

    /// Segment files, per-segment sizes and row count.
    pub fn get_index_info(&self) -> &ColumnIndex {
        &self.index
    }

    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub fn renamed(&self, name: impl Into<String>) -> ColumnArray {
        let mut index = (*self.index).clone();
        index.name = name.into();
        ColumnArray {
            store: Arc::clone(&self.store),
            index: Arc::new(index),
            temp: self.temp.clone(),
        }
    }

    /// Row-wise concatenation. Shares the segment files of both inputs.
    pub fn append(&self, other: &ColumnArray) -> Result<ColumnArray> {
        if !self.data_type().compatible_with(&other.data_type()) {
            return Err(Error::Schema(format!(
                "cannot append {} column '{}' to {} column '{}'",
                other.data_type(),
                other.name(),
                self.data_type(),
                self.name()
            )));
        }
        let mut index = (*self.index).clone();
        index.data_type = self.data_type().unify(&other.data_type());
        index.num_rows += other.index.num_rows;
        index.segments.extend(other.index.segments.iter().cloned());
        index
            .segment_sizes
            .extend(other.index.segment_sizes.iter().copied());
        let mut out = ColumnArray::new(Arc::clone(&self.store), index)?;
        out.temp = self.temp.clone();
        for t in &other.temp {
            if !out.temp.iter().any(|o| Arc::ptr_eq(o, t)) {
                out.temp.push(Arc::clone(t));
            }
        }
        Ok(out)
    }

    /// Whether any file under this column is removed once it is dropped.
    pub fn is_temporary(&self) -> bool {
        !self.temp.is_empty()
    }

    pub(crate) fn with_temp(mut self, files: &Arc<TempFiles>) -> ColumnArray {
        self.temp.push(Arc::clone(files));
        self
    }

    pub(crate) fn keep_files(&self) {
        for t in &self.temp {
            t.keep();
        }
    }

    pub fn reader(&self) -> Result<ColumnReader> {
        ColumnReader::open(self)
    }

    /// Whole column in memory.
    pub fn to_vec(&self) -> Result<Vec<Scalar>> {
        let mut out = Vec::with_capacity(self.len() as usize);
        self.reader()?.read_rows(0, self.len(), &mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for ColumnArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnArray")
            .field("name", &self.index.name)
            .field("data_type", &self.index.data_type)
            .field("num_rows", &self.index.num_rows)
            .field("segments", &self.index.segments.len())
            .finish()
    }
}

/// Random-access reader over a column. Holds the column's segments open
/// until dropped.
pub struct ColumnReader {
    store: Arc<BlockStore>,
    _handles: Vec<ColumnHandle>,
    blocks: Vec<BlockAddress>,
    /// First row of each block; `starts.len() == blocks.len()`.
    starts: Vec<u64>,
    num_rows: u64,
    current: Option<(usize, Arc<Vec<Scalar>>)>,
}

impl ColumnReader {
    fn open(column: &ColumnArray) -> Result<Self> {
        let store = Arc::clone(column.store());
        let index = column.get_index_info();
        let mut handles = Vec::with_capacity(index.segments.len());
        let mut blocks = Vec::new();
        let mut starts = Vec::new();
        let mut row = 0u64;
        for (seg, expected) in index.segments.iter().zip(&index.segment_sizes) {
            let handle = store.open_column_guard(&seg.file, seg.column)?;
            let infos = store.column_block_infos(handle.address())?;
            let mut seg_rows = 0u64;
            for (b, info) in infos.iter().enumerate() {
                if info.num_rows == 0 {
                    continue;
                }
                blocks.push(handle.address().block(b));
                starts.push(row + seg_rows);
                seg_rows += info.num_rows;
            }
            if seg_rows != *expected {
                return Err(Error::corrupt(
                    &seg.file,
                    format!(
                        "column {} holds {seg_rows} rows, index says {expected}",
                        seg.column
                    ),
                ));
            }
            row += seg_rows;
            handles.push(handle);
        }
        Ok(Self {
            store,
            _handles: handles,
            blocks,
            starts,
            num_rows: row,
            current: None,
        })
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn block(&mut self, i: usize) -> Result<Arc<Vec<Scalar>>> {
        if let Some((cur, values)) = &self.current {
            if *cur == i {
                return Ok(Arc::clone(values));
            }
        }
        let (values, _) = self.store.read_block(self.blocks[i])?;
        self.current = Some((i, Arc::clone(&values)));
        Ok(values)
    }

    /// Append rows `[begin, end)` to `out`, clamped to the column length.
    /// Returns the number of rows appended.
    pub fn read_rows(&mut self, begin: u64, end: u64, out: &mut Vec<Scalar>) -> Result<usize> {
        if begin > end {
            return Err(Error::Invalid(format!("read_rows: begin {begin} > end {end}")));
        }
        let end = end.min(self.num_rows);
        let mut pos = begin.min(end);
        let wanted = (end - pos) as usize;
        out.reserve(wanted);
        while pos < end {
            let b = self.starts.partition_point(|&s| s <= pos) - 1;
            let values = self.block(b)?;
            let start = self.starts[b];
            let lo = (pos - start) as usize;
            let hi = ((end - start) as usize).min(values.len());
            out.extend_from_slice(&values[lo..hi]);
            pos = start + hi as u64;
        }
        Ok(wanted)
    }
}

/// Writer of a single-column array.
pub struct ColumnWriter {
    inner: TableWriter,
}

impl ColumnWriter {
    pub fn num_segments(&self) -> usize {
        self.inner.num_segments()
    }

    pub fn set_type(&mut self, data_type: DataType) -> Result<()> {
        self.inner.set_type(0, data_type)
    }

    pub fn output(&mut self, segment: usize) -> Result<SegmentOutput> {
        self.inner.output(segment)
    }

    pub fn close(self) -> Result<ColumnArray> {
        let table: Table = self.inner.close()?;
        table
            .column(0)
            .cloned()
            .ok_or_else(|| Error::Invariant("single-column writer produced no column".into()))
    }

    pub fn abort(self) {
        self.inner.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::config::EngineConfig;

    fn store(cfg: EngineConfig) -> Arc<BlockStore> {
        Arc::new(BlockStore::new(&cfg).unwrap())
    }

    fn small_blocks() -> EngineConfig {
        EngineConfig {
            target_block_bytes: 64,
            min_rows_per_block: 3,
            max_rows_per_block: 5,
            ..EngineConfig::default()
        }
    }

    fn write_ints(store: &Arc<BlockStore>, path: PathBuf, segs: &[std::ops::Range<i64>]) -> ColumnArray {
        let mut w = ColumnArray::open_for_write(store, path, segs.len(), DataType::Int64).unwrap();
        for (s, r) in segs.iter().enumerate() {
            let mut out = w.output(s).unwrap();
            for i in r.clone() {
                out.write_value(Scalar::I64(i)).unwrap();
            }
            out.finish().unwrap();
        }
        w.close().unwrap()
    }

    #[test]
    fn reads_across_blocks_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let st = store(small_blocks());
        let col = write_ints(&st, dir.path().join("c.sidx"), &[0..7, 7..7, 7..20]);
        assert_eq!(col.len(), 20);
        assert_eq!(col.segment_sizes(), &[7, 0, 13]);

        let mut r = col.reader().unwrap();
        assert!(r.num_blocks() > 3);
        let mut out = Vec::new();
        assert_eq!(r.read_rows(4, 16, &mut out).unwrap(), 12);
        assert_eq!(out, (4..16).map(Scalar::I64).collect::<Vec<_>>());
    }

    #[test]
    fn read_rows_clamps_and_rejects_reversed_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let st = store(small_blocks());
        let col = write_ints(&st, dir.path().join("c.sidx"), &[0..4]);
        let mut r = col.reader().unwrap();
        let mut out = Vec::new();
        assert_eq!(r.read_rows(2, 100, &mut out).unwrap(), 2);
        assert_eq!(r.read_rows(50, 60, &mut out).unwrap(), 0);
        assert!(matches!(r.read_rows(3, 1, &mut out), Err(Error::Invalid(_))));
        assert_eq!(out, vec![Scalar::I64(2), Scalar::I64(3)]);
    }

    #[test]
    fn readers_release_their_handles() {
        let dir = tempfile::tempdir().unwrap();
        let st = store(small_blocks());
        let col = write_ints(&st, dir.path().join("c.sidx"), &[0..4, 4..8]);
        {
            let _r = col.reader().unwrap();
            assert_eq!(st.stats().open_handles, 2);
        }
        assert_eq!(st.stats().open_handles, 0);
    }

    #[test]
    fn append_shares_segments() {
        let dir = tempfile::tempdir().unwrap();
        let st = store(EngineConfig::default());
        let a = write_ints(&st, dir.path().join("a.sidx"), &[0..3]);
        let b = write_ints(&st, dir.path().join("b.sidx"), &[3..5, 5..6]);
        let ab = a.append(&b).unwrap();
        assert_eq!(ab.num_segments(), 3);
        assert_eq!(ab.to_vec().unwrap(), (0..6).map(Scalar::I64).collect::<Vec<_>>());

        let s = ColumnArray::empty(Arc::clone(&st), "s", DataType::Utf8);
        assert!(matches!(a.append(&s), Err(Error::Schema(_))));
    }

    #[test]
    fn wrong_type_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let st = store(EngineConfig::default());
        let mut w = ColumnArray::open_for_write(&st, dir.path().join("c.sidx"), 1, DataType::Int64).unwrap();
        let mut out = w.output(0).unwrap();
        assert!(matches!(
            out.write_value(Scalar::Str("x".into())),
            Err(Error::Schema(_))
        ));
        out.write_value(Scalar::Null).unwrap();
        out.finish().unwrap();
        let col = w.close().unwrap();
        assert_eq!(col.to_vec().unwrap(), vec![Scalar::Null]);
    }

    #[test]
    fn undefined_type_is_resolved_from_writes() {
        let dir = tempfile::tempdir().unwrap();
        let st = store(EngineConfig::default());
        let mut w = ColumnArray::open_for_write(&st, dir.path().join("c.sidx"), 2, DataType::Undefined).unwrap();
        let mut a = w.output(0).unwrap();
        a.write_value(Scalar::Null).unwrap();
        a.write_value(Scalar::F64(1.5)).unwrap();
        a.finish().unwrap();
        let col = w.close().unwrap();
        assert_eq!(col.data_type(), DataType::Float64);
        assert_eq!(col.len(), 2);
    }
}
