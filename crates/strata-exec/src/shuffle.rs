//! Hash partitioning of a table into bucket segments.
//!
//! Workers each read a contiguous row range of the input and route every row
//! to the segment of its key hash. All workers share one locked
//! `SegmentOutput` per bucket and write to it through their own
//! `BufferedWriter`s, so contention is limited to buffer flushes.

use std::sync::Mutex;

use strata_core::hash::hash_row_key;
use strata_core::types::Scalar;
use strata_planner::segment_range;
use strata_storage::{BufferedWriter, SegmentOutput, Table, TableWriter};

use crate::engine::Engine;
use crate::error::{ExecError, Result};
use crate::scheduler;

impl Engine {
    /// Copy of `table` with `num_buckets` segments where every row sits in
    /// the segment given by the hash of its `key_columns`. Rows with equal
    /// keys land in the same segment; order within a segment is unspecified.
    /// The result lives in the temp directory until dropped or saved.
    pub fn hash_partition(&self, table: &Table, key_columns: &[usize], num_buckets: usize) -> Result<Table> {
        if num_buckets == 0 {
            return Err(ExecError::Invalid("hash partition needs at least one bucket".into()));
        }
        if key_columns.is_empty() {
            return Err(ExecError::Invalid("hash partition needs at least one key column".into()));
        }
        if let Some(&bad) = key_columns.iter().find(|&&c| c >= table.num_columns()) {
            return Err(ExecError::Invalid(format!(
                "key column {bad} out of range for {} columns",
                table.num_columns()
            )));
        }
        let _span = tracing::info_span!("hash_partition", buckets = num_buckets, rows = table.num_rows()).entered();

        let mut writer = TableWriter::open_for_write(
            self.store(),
            self.temp_index_path(),
            table.column_names(),
            table.column_types(),
            num_buckets,
        )?;
        let sinks: Vec<Mutex<SegmentOutput>> = match writer.outputs() {
            Ok(outputs) => outputs.into_iter().map(Mutex::new).collect(),
            Err(e) => {
                writer.abort();
                return Err(e.into());
            }
        };

        let cfg = self.config();
        let workers = cfg.max_parallel_tasks.max(1);
        let ranges: Vec<(u64, u64)> = (0..workers)
            .map(|i| segment_range(0, table.num_rows(), i, workers))
            .filter(|(b, e)| b < e)
            .collect();
        let result = scheduler::run_all(self.pool(), ranges, |_, (begin, end)| {
            route_rows(table, key_columns, &sinks, begin, end, cfg.block_size, cfg.writer_soft_limit, cfg.writer_hard_limit)
        })
        .and_then(|_| finish_sinks(sinks));

        match result {
            Ok(()) => Ok(writer.close()?.into_temporary()),
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn route_rows(
    table: &Table,
    key_columns: &[usize],
    sinks: &[Mutex<SegmentOutput>],
    begin: u64,
    end: u64,
    block_size: usize,
    soft_limit: usize,
    hard_limit: usize,
) -> Result<()> {
    let mut writers = sinks
        .iter()
        .map(|s| BufferedWriter::<Vec<Scalar>, SegmentOutput>::new(s, soft_limit, hard_limit))
        .collect::<strata_storage::Result<Vec<_>>>()?;
    let mut reader = table.reader()?;
    let buckets = sinks.len() as u64;
    let mut pos = begin;
    while pos < end {
        let hi = (pos + block_size as u64).min(end);
        let batch = reader.read_rows(pos, hi)?;
        for r in 0..batch.num_rows() {
            let key: Vec<&Scalar> = key_columns.iter().map(|&c| &batch.columns[c][r]).collect();
            let bucket = (hash_row_key(&key) % buckets) as usize;
            writers[bucket].write(batch.row(r))?;
        }
        pos = hi;
    }
    for w in &mut writers {
        w.flush()?;
    }
    Ok(())
}

/// Row range `[begin, end)` of every segment of `table`.
pub(crate) fn segment_bounds(table: &Table) -> Vec<(u64, u64)> {
    let sizes = table.column(0).map(|c| c.segment_sizes()).unwrap_or(&[]);
    let mut start = 0u64;
    sizes
        .iter()
        .map(|&n| {
            let range = (start, start + n);
            start += n;
            range
        })
        .collect()
}

fn finish_sinks(sinks: Vec<Mutex<SegmentOutput>>) -> Result<()> {
    for sink in sinks {
        let out = sink
            .into_inner()
            .map_err(|_| ExecError::Invalid("bucket output lock poisoned".into()))?;
        out.finish()?;
    }
    Ok(())
}
