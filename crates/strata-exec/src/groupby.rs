//! Hash-partitioned group-by.
//!
//! The input is hash partitioned on the key columns so every group lives in
//! exactly one bucket. Each bucket is then aggregated independently on the
//! worker pool and written to its own output segment. Groups appear in the
//! order their first row is seen within the bucket.

use std::collections::HashMap;

use strata_core::hash::hash_row_key;
use strata_core::schema::{dedup_names, DataType};
use strata_core::types::Scalar;
use strata_operators::{AggState, Aggregate};
use strata_storage::{SegmentOutput, Table, TableWriter};

use crate::engine::Engine;
use crate::error::{ExecError, Result};
use crate::scheduler;
use crate::shuffle::segment_bounds;

/// Groups of one bucket, indexed by key hash.
struct Groups<'a> {
    aggregates: &'a [Aggregate],
    input_types: &'a [DataType],
    index: HashMap<u64, Vec<usize>>,
    keys: Vec<Vec<Scalar>>,
    states: Vec<Vec<AggState>>,
}

impl<'a> Groups<'a> {
    fn new(aggregates: &'a [Aggregate], input_types: &'a [DataType]) -> Self {
        Self {
            aggregates,
            input_types,
            index: HashMap::new(),
            keys: Vec::new(),
            states: Vec::new(),
        }
    }

    fn group_of(&mut self, key: &[&Scalar]) -> usize {
        let slot = self.index.entry(hash_row_key(key)).or_default();
        if let Some(&g) = slot.iter().find(|&&g| self.keys[g].iter().eq(key.iter().copied())) {
            return g;
        }
        let g = self.keys.len();
        slot.push(g);
        self.keys.push(key.iter().map(|&v| v.clone()).collect());
        self.states.push(
            self.aggregates
                .iter()
                .map(|a| AggState::new(a.kind, a.column.map(|c| self.input_types[c])))
                .collect(),
        );
        g
    }
}

impl Engine {
    /// One row per distinct combination of `key_columns`: the key values
    /// followed by one column per aggregate. Null keys form their own group.
    /// The result lives in the temp directory until dropped or saved.
    pub fn groupby_aggregate(&self, table: &Table, key_columns: &[usize], aggregates: &[Aggregate]) -> Result<Table> {
        let in_types = table.column_types();
        let in_names = table.column_names();
        let width = table.num_columns();
        if let Some(bad) = aggregates.iter().filter_map(|a| a.column).find(|&c| c >= width) {
            return Err(ExecError::Invalid(format!("aggregate column {bad} out of range for {width} columns")));
        }
        let mut names: Vec<String> = key_columns.iter().filter_map(|&c| in_names.get(c).cloned()).collect();
        let mut types: Vec<DataType> = key_columns.iter().filter_map(|&c| in_types.get(c).copied()).collect();
        for a in aggregates {
            names.push(a.name.clone());
            types.push(a.kind.output_type(a.column.map(|c| in_types[c]))?);
        }
        let names = dedup_names(&names);

        let cfg = self.config();
        let buckets = cfg.max_parallel_tasks.max(1);
        let parted = self.hash_partition(table, key_columns, buckets)?;
        let _span = tracing::info_span!("groupby_aggregate", buckets, rows = table.num_rows()).entered();

        let mut writer = TableWriter::open_for_write(self.store(), self.temp_index_path(), names, types, buckets)?;
        let outputs = match writer.outputs() {
            Ok(outputs) => outputs,
            Err(e) => {
                writer.abort();
                return Err(e.into());
            }
        };
        let work: Vec<_> = outputs.into_iter().zip(segment_bounds(&parted)).collect();
        let result = scheduler::run_all(self.pool(), work, |_, (out, (begin, end))| {
            aggregate_bucket(&parted, key_columns, aggregates, &in_types, out, begin, end, cfg.block_size)
        });

        match result {
            Ok(groups) => {
                tracing::debug!(groups = groups.iter().sum::<usize>(), "groups written");
                Ok(writer.close()?.into_temporary())
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn aggregate_bucket(
    table: &Table,
    key_columns: &[usize],
    aggregates: &[Aggregate],
    input_types: &[DataType],
    mut out: SegmentOutput,
    begin: u64,
    end: u64,
    block_size: usize,
) -> Result<usize> {
    let mut groups = Groups::new(aggregates, input_types);
    let mut reader = table.reader()?;
    let mut pos = begin;
    while pos < end {
        let hi = (pos + block_size.max(1) as u64).min(end);
        let batch = reader.read_rows(pos, hi)?;
        for r in 0..batch.num_rows() {
            let key: Vec<&Scalar> = key_columns.iter().map(|&c| &batch.columns[c][r]).collect();
            let g = groups.group_of(&key);
            for (state, a) in groups.states[g].iter_mut().zip(aggregates) {
                state.update(a.column.map(|c| &batch.columns[c][r]))?;
            }
        }
        pos = hi;
    }

    let mut row = Vec::with_capacity(key_columns.len() + aggregates.len());
    for (key, states) in groups.keys.iter().zip(&groups.states) {
        row.clear();
        row.extend(key.iter().cloned());
        row.extend(states.iter().map(AggState::finish));
        out.write_row(&row)?;
    }
    out.finish()?;
    Ok(groups.keys.len())
}
