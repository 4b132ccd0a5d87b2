//! Hash-partitioned equi-join.
//!
//! Both sides are hash partitioned on their key columns with the same bucket
//! count, so matching rows always meet in the same bucket. Per bucket the
//! right side is loaded into a hash table and the left side streams past it.
//! Rows whose key contains a null never match.

use std::collections::HashMap;

use strata_core::hash::hash_row_key;
use strata_core::schema::dedup_names;
use strata_core::types::{RowBatch, Scalar};
use strata_storage::{SegmentOutput, Table, TableWriter};

use crate::engine::Engine;
use crate::error::{ExecError, Result};
use crate::scheduler;
use crate::shuffle::segment_bounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    /// Unmatched left rows are kept with nulls on the right.
    Left,
    /// Unmatched right rows are kept with nulls on the left.
    Right,
    /// Both.
    Outer,
}

impl JoinKind {
    fn keeps_left(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Outer)
    }

    fn keeps_right(self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Outer)
    }
}

impl std::str::FromStr for JoinKind {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inner" => Ok(JoinKind::Inner),
            "left" => Ok(JoinKind::Left),
            "right" => Ok(JoinKind::Right),
            "outer" => Ok(JoinKind::Outer),
            other => Err(ExecError::Invalid(format!("unknown join kind '{other}'"))),
        }
    }
}

/// Column layout shared by every bucket task.
struct JoinShape<'a> {
    left_keys: &'a [usize],
    right_keys: &'a [usize],
    /// Right columns that are not keys, in output order.
    right_rest: Vec<usize>,
    left_width: usize,
    kind: JoinKind,
}

impl JoinShape<'_> {
    fn matched(&self, left: &[Scalar], right: &[Scalar]) -> Vec<Scalar> {
        let mut row = left.to_vec();
        row.extend(self.right_rest.iter().map(|&c| right[c].clone()));
        row
    }

    fn left_only(&self, left: &[Scalar]) -> Vec<Scalar> {
        let mut row = left.to_vec();
        row.resize(self.left_width + self.right_rest.len(), Scalar::Null);
        row
    }

    /// Right row with its key values placed in the left key columns.
    fn right_only(&self, right: &[Scalar]) -> Vec<Scalar> {
        let mut row = vec![Scalar::Null; self.left_width];
        for (&l, &r) in self.left_keys.iter().zip(self.right_keys) {
            row[l] = right[r].clone();
        }
        row.extend(self.right_rest.iter().map(|&c| right[c].clone()));
        row
    }
}

fn key_of<'r>(row: &'r [Scalar], keys: &[usize]) -> Option<Vec<&'r Scalar>> {
    let key: Vec<&Scalar> = keys.iter().map(|&c| &row[c]).collect();
    if key.iter().any(|v| v.is_null()) {
        None
    } else {
        Some(key)
    }
}

fn check_keys(table: &Table, keys: &[usize], side: &str) -> Result<()> {
    if let Some(&bad) = keys.iter().find(|&&c| c >= table.num_columns()) {
        return Err(ExecError::Invalid(format!(
            "{side} key column {bad} out of range for {} columns",
            table.num_columns()
        )));
    }
    Ok(())
}

impl Engine {
    /// Equi-join of `left` and `right` on `on` pairs of (left, right) key
    /// columns. The output holds every left column followed by the right
    /// columns that are not keys. Row order is unspecified. The result lives
    /// in the temp directory until dropped or saved.
    pub fn join(&self, left: &Table, right: &Table, on: &[(usize, usize)], kind: JoinKind) -> Result<Table> {
        if on.is_empty() {
            return Err(ExecError::Invalid("join needs at least one key pair".into()));
        }
        let left_keys: Vec<usize> = on.iter().map(|&(l, _)| l).collect();
        let right_keys: Vec<usize> = on.iter().map(|&(_, r)| r).collect();
        check_keys(left, &left_keys, "left")?;
        check_keys(right, &right_keys, "right")?;

        let (lt, rt) = (left.column_types(), right.column_types());
        for &(l, r) in on {
            if lt[l] != rt[r] {
                return Err(ExecError::Invalid(format!(
                    "join key types differ: {} and {}",
                    lt[l], rt[r]
                )));
            }
        }
        let right_rest: Vec<usize> = (0..right.num_columns()).filter(|c| !right_keys.contains(c)).collect();
        let mut names = left.column_names();
        let right_names = right.column_names();
        names.extend(right_rest.iter().map(|&c| right_names[c].clone()));
        let mut types = lt.clone();
        types.extend(right_rest.iter().map(|&c| rt[c]));
        let names = dedup_names(&names);

        let buckets = self.config().max_parallel_tasks.max(1);
        let lp = self.hash_partition(left, &left_keys, buckets)?;
        let rp = self.hash_partition(right, &right_keys, buckets)?;
        let _span = tracing::info_span!(
            "join",
            kind = ?kind,
            buckets,
            left_rows = left.num_rows(),
            right_rows = right.num_rows()
        )
        .entered();

        let shape = JoinShape {
            left_keys: &left_keys,
            right_keys: &right_keys,
            right_rest,
            left_width: left.num_columns(),
            kind,
        };
        let mut writer = TableWriter::open_for_write(self.store(), self.temp_index_path(), names, types, buckets)?;
        let outputs = match writer.outputs() {
            Ok(outputs) => outputs,
            Err(e) => {
                writer.abort();
                return Err(e.into());
            }
        };
        let work: Vec<_> = outputs
            .into_iter()
            .zip(segment_bounds(&lp).into_iter().zip(segment_bounds(&rp)))
            .collect();
        let block_size = self.config().block_size.max(1);
        let result = scheduler::run_all(self.pool(), work, |_, (out, (lb, rb))| {
            join_bucket(&lp, &rp, &shape, out, lb, rb, block_size)
        });

        match result {
            Ok(rows) => {
                tracing::debug!(rows = rows.iter().sum::<u64>(), "join rows written");
                Ok(writer.close()?.into_temporary())
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }
}

fn join_bucket(
    left: &Table,
    right: &Table,
    shape: &JoinShape<'_>,
    mut out: SegmentOutput,
    (lb, le): (u64, u64),
    (rb, re): (u64, u64),
    block_size: usize,
) -> Result<u64> {
    let build: RowBatch = right.reader()?.read_rows(rb, re)?;
    let build_rows: Vec<Vec<Scalar>> = (0..build.num_rows()).map(|r| build.row(r)).collect();
    let mut table: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, row) in build_rows.iter().enumerate() {
        if let Some(key) = key_of(row, shape.right_keys) {
            table.entry(hash_row_key(&key)).or_default().push(i);
        }
    }
    let mut right_matched = vec![false; build_rows.len()];
    let mut written = 0u64;

    let mut reader = left.reader()?;
    let mut pos = lb;
    while pos < le {
        let hi = (pos + block_size as u64).min(le);
        let batch = reader.read_rows(pos, hi)?;
        for r in 0..batch.num_rows() {
            let row = batch.row(r);
            let mut any = false;
            if let Some(key) = key_of(&row, shape.left_keys) {
                let candidates = table.get(&hash_row_key(&key)).map(Vec::as_slice).unwrap_or(&[]);
                for &i in candidates {
                    let other = &build_rows[i];
                    if shape.right_keys.iter().map(|&c| &other[c]).eq(key.iter().copied()) {
                        out.write_row(&shape.matched(&row, other))?;
                        right_matched[i] = true;
                        any = true;
                        written += 1;
                    }
                }
            }
            if !any && shape.kind.keeps_left() {
                out.write_row(&shape.left_only(&row))?;
                written += 1;
            }
        }
        pos = hi;
    }

    if shape.kind.keeps_right() {
        for (row, _) in build_rows.iter().zip(&right_matched).filter(|&(_, &m)| !m) {
            out.write_row(&shape.right_only(row))?;
            written += 1;
        }
    }
    out.finish()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_kinds_parse() {
        assert_eq!("outer".parse::<JoinKind>().unwrap(), JoinKind::Outer);
        assert!(JoinKind::Left.keeps_left() && !JoinKind::Left.keeps_right());
        assert!(JoinKind::Outer.keeps_left() && JoinKind::Outer.keeps_right());
        assert!(!JoinKind::Inner.keeps_left() && !JoinKind::Inner.keeps_right());
        assert!("cross".parse::<JoinKind>().is_err());
    }
}
