//! Segmented table writer.
//!
//! `TableWriter::open_for_write` creates one segment file per segment and
//! hands out one `SegmentOutput` per segment. Each output is `Send` and can
//! run on its own thread; rows written to one output land in that segment in
//! order. `close` checks every output finished and writes the index.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use strata_core::config::EngineConfig;
use strata_core::schema::DataType;
use strata_core::types::{RowBatch, Scalar};

use crate::block_store::BlockStore;
use crate::block_writer::{segment_file_path, BlockWriter};
use crate::column::ColumnArray;
use crate::error::{Error, Result};
use crate::index::{ColumnIndex, SegmentRef};
use crate::table::Table;

/// When a column buffer is flushed as a block.
///
/// Starts from a guess of 8 bytes per value and then adapts to the encoded
/// size of the blocks actually written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub target_block_bytes: usize,
    pub min_rows: usize,
    pub max_rows: usize,
}

impl FlushPolicy {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            target_block_bytes: cfg.target_block_bytes,
            min_rows: cfg.min_rows_per_block,
            max_rows: cfg.max_rows_per_block,
        }
    }

    pub fn initial_rows(&self) -> usize {
        (self.target_block_bytes / 8).clamp(self.min_rows, self.max_rows)
    }

    /// Next flush threshold given the last block's encoded size.
    pub fn next_rows(&self, encoded_bytes: u64, rows: u64) -> usize {
        if rows == 0 {
            return self.initial_rows();
        }
        let per_row = (encoded_bytes / rows).max(1) as usize;
        (self.target_block_bytes / per_row).clamp(self.min_rows, self.max_rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Nothing,
    One(DataType),
    Mixed,
}

impl Observed {
    fn see(self, t: DataType) -> Observed {
        match self {
            Observed::Nothing => Observed::One(t),
            Observed::One(u) if u == t => self,
            _ => Observed::Mixed,
        }
    }

    fn merge(self, other: Observed) -> Observed {
        match other {
            Observed::Nothing => self,
            Observed::One(t) => self.see(t),
            Observed::Mixed => Observed::Mixed,
        }
    }
}

struct Progress {
    rows: Vec<u64>,
    finished: Vec<bool>,
    observed: Vec<Observed>,
}

pub struct TableWriter {
    store: Arc<BlockStore>,
    index_path: PathBuf,
    names: Vec<String>,
    types: Vec<DataType>,
    writer: Arc<BlockWriter>,
    progress: Arc<Mutex<Progress>>,
    taken: Vec<bool>,
}

impl TableWriter {
    pub fn open_for_write(
        store: &Arc<BlockStore>,
        index_path: impl Into<PathBuf>,
        names: Vec<String>,
        types: Vec<DataType>,
        num_segments: usize,
    ) -> Result<Self> {
        let index_path = index_path.into();
        if names.len() != types.len() {
            return Err(Error::Schema(format!(
                "{} column names for {} column types",
                names.len(),
                types.len()
            )));
        }
        if num_segments == 0 {
            return Err(Error::Invalid("a table needs at least one segment".into()));
        }
        let paths = (0..num_segments)
            .map(|i| segment_file_path(&index_path, i))
            .collect();
        let settings = store.writer_settings();
        let writer = BlockWriter::create(store, paths, names.len(), settings.codec)?;
        tracing::debug!(
            index = %index_path.display(),
            columns = names.len(),
            segments = num_segments,
            "table opened for write"
        );
        Ok(Self {
            store: Arc::clone(store),
            index_path,
            progress: Arc::new(Mutex::new(Progress {
                rows: vec![0; num_segments],
                finished: vec![false; num_segments],
                observed: vec![Observed::Nothing; names.len()],
            })),
            names,
            types,
            writer: Arc::new(writer),
            taken: vec![false; num_segments],
        })
    }

    pub fn num_segments(&self) -> usize {
        self.taken.len()
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Declare a column's type. Only allowed before any output is taken.
    pub fn set_type(&mut self, column: usize, data_type: DataType) -> Result<()> {
        if self.taken.iter().any(|&t| t) {
            return Err(Error::Invalid(
                "column types must be set before outputs are taken".into(),
            ));
        }
        let slot = self.types.get_mut(column).ok_or_else(|| {
            Error::Invalid(format!("column {column} out of range"))
        })?;
        *slot = data_type;
        Ok(())
    }

    /// The output of `segment`. Each segment's output can be taken once.
    pub fn output(&mut self, segment: usize) -> Result<SegmentOutput> {
        let taken = self.taken.get_mut(segment).ok_or_else(|| {
            Error::Invalid(format!("segment {segment} out of range"))
        })?;
        if *taken {
            return Err(Error::Invalid(format!(
                "output for segment {segment} already taken"
            )));
        }
        *taken = true;
        let policy = self.store.writer_settings().flush;
        let n = self.names.len();
        Ok(SegmentOutput {
            writer: Arc::clone(&self.writer),
            segment,
            types: self.types.clone(),
            buffers: vec![Vec::new(); n],
            flush_at: vec![policy.initial_rows(); n],
            policy,
            rows: 0,
            observed: vec![Observed::Nothing; n],
            progress: Arc::clone(&self.progress),
            finished: false,
        })
    }

    /// All outputs, in segment order.
    pub fn outputs(&mut self) -> Result<Vec<SegmentOutput>> {
        (0..self.num_segments()).map(|s| self.output(s)).collect()
    }

    /// Finish the table: segments whose output was never taken are closed
    /// empty, the index is written and the table returned.
    pub fn close(self) -> Result<Table> {
        match self.close_inner() {
            Ok(t) => Ok(t),
            Err((writer, e)) => {
                writer.abort();
                Err(e)
            }
        }
    }

    fn close_inner(self) -> std::result::Result<Table, (Arc<BlockWriter>, Error)> {
        let writer = Arc::clone(&self.writer);
        self.build().map_err(|e| (writer, e))
    }

    fn build(self) -> Result<Table> {
        for (s, taken) in self.taken.iter().enumerate() {
            if !taken {
                self.writer.close_segment(s)?;
            }
        }
        let progress = crate::lock(&self.progress, "table writer progress")?;
        for (s, taken) in self.taken.iter().enumerate() {
            if *taken && !progress.finished[s] {
                return Err(Error::Invariant(format!(
                    "output of segment {s} was not finished"
                )));
            }
        }

        let num_rows: u64 = progress.rows.iter().sum();
        let mut columns = Vec::with_capacity(self.names.len());
        for (c, name) in self.names.iter().enumerate() {
            let data_type = match (self.types[c], progress.observed[c]) {
                (DataType::Undefined, Observed::One(t)) => t,
                (t, _) => t,
            };
            let segments = (0..self.num_segments())
                .map(|s| {
                    Ok(SegmentRef {
                        file: self.writer.segment_path(s)?,
                        column: c,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let index = ColumnIndex {
                name: name.clone(),
                data_type,
                num_rows,
                segments,
                segment_sizes: progress.rows.clone(),
                metadata: Default::default(),
            };
            columns.push(ColumnArray::new(Arc::clone(&self.store), index)?);
        }
        drop(progress);

        let mut table = Table::from_columns(&self.store, self.names.clone(), columns)?;
        table.save(&self.index_path)?;
        tracing::debug!(index = %self.index_path.display(), rows = num_rows, "table written");
        Ok(table)
    }

    /// Delete everything written so far.
    pub fn abort(self) {
        self.writer.abort();
    }
}

/// Writer for one segment of a table under construction.
pub struct SegmentOutput {
    writer: Arc<BlockWriter>,
    segment: usize,
    types: Vec<DataType>,
    buffers: Vec<Vec<Scalar>>,
    flush_at: Vec<usize>,
    policy: FlushPolicy,
    rows: u64,
    observed: Vec<Observed>,
    progress: Arc<Mutex<Progress>>,
    finished: bool,
}

impl SegmentOutput {
    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn num_columns(&self) -> usize {
        self.types.len()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    fn check(&mut self, column: usize, value: &Scalar) -> Result<()> {
        let declared = self.types[column];
        if !declared.accepts(value) {
            return Err(Error::Schema(format!(
                "column {column} is {declared}, got {}",
                value.data_type()
            )));
        }
        if !value.is_null() {
            self.observed[column] = self.observed[column].see(value.data_type());
        }
        Ok(())
    }

    pub fn write_row(&mut self, row: &[Scalar]) -> Result<()> {
        if row.len() != self.types.len() {
            return Err(Error::Schema(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.types.len()
            )));
        }
        for (c, v) in row.iter().enumerate() {
            self.check(c, v)?;
        }
        for (c, v) in row.iter().enumerate() {
            self.buffers[c].push(v.clone());
            if self.buffers[c].len() >= self.flush_at[c] {
                self.flush_column(c)?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    /// Single-column convenience.
    pub fn write_value(&mut self, value: Scalar) -> Result<()> {
        self.write_row(std::slice::from_ref(&value))
    }

    pub fn write_batch(&mut self, batch: &RowBatch) -> Result<()> {
        if batch.num_columns() != self.types.len() {
            return Err(Error::Schema(format!(
                "batch has {} columns, table has {}",
                batch.num_columns(),
                self.types.len()
            )));
        }
        for (c, col) in batch.columns.iter().enumerate() {
            for v in col {
                self.check(c, v)?;
            }
        }
        for (c, col) in batch.columns.iter().enumerate() {
            let mut rest = &col[..];
            while !rest.is_empty() {
                let room = self.flush_at[c].saturating_sub(self.buffers[c].len()).max(1);
                let (now, later) = rest.split_at(room.min(rest.len()));
                self.buffers[c].extend_from_slice(now);
                if self.buffers[c].len() >= self.flush_at[c] {
                    self.flush_column(c)?;
                }
                rest = later;
            }
        }
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    fn flush_column(&mut self, c: usize) -> Result<()> {
        if self.buffers[c].is_empty() {
            return Ok(());
        }
        let values = std::mem::take(&mut self.buffers[c]);
        let info = self.writer.write_block(self.segment, c, &values)?;
        self.flush_at[c] = self.policy.next_rows(info.length, info.num_rows);
        tracing::trace!(
            segment = self.segment,
            column = c,
            rows = info.num_rows,
            bytes = info.length,
            next = self.flush_at[c],
            "block flushed"
        );
        Ok(())
    }

    /// Flush remaining buffers and close the segment file.
    pub fn finish(mut self) -> Result<u64> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> Result<u64> {
        if self.finished {
            return Ok(self.rows);
        }
        self.finished = true;
        for c in 0..self.buffers.len() {
            self.flush_column(c)?;
        }
        self.writer.close_segment(self.segment)?;
        let mut progress = crate::lock(&self.progress, "table writer progress")?;
        progress.rows[self.segment] = self.rows;
        progress.finished[self.segment] = true;
        for (acc, seen) in progress.observed.iter_mut().zip(&self.observed) {
            *acc = acc.merge(*seen);
        }
        Ok(self.rows)
    }
}

impl Drop for SegmentOutput {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish_inner() {
                tracing::warn!(segment = self.segment, error = %e, "segment output dropped unfinished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_policy_adapts_to_encoded_size() {
        let p = FlushPolicy {
            target_block_bytes: 1024,
            min_rows: 4,
            max_rows: 100,
        };
        assert_eq!(p.initial_rows(), 100);
        assert_eq!(p.next_rows(800, 100), 100); // 8 bytes per row -> 128, clamped
        assert_eq!(p.next_rows(6400, 100), 16);
        assert_eq!(p.next_rows(1 << 20, 1), 4);
    }

    #[test]
    fn observed_types_merge() {
        let a = Observed::Nothing.see(DataType::Int64);
        assert_eq!(a, Observed::One(DataType::Int64));
        assert_eq!(a.merge(Observed::One(DataType::Utf8)), Observed::Mixed);
        assert_eq!(Observed::Nothing.merge(a), a);
    }
}
