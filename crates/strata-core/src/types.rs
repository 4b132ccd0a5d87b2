//! Values and the column-major `RowBatch` moved between operators.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Undefined,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I64(_) => DataType::Int64,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Bin(_) => DataType::Binary,
        }
    }

    /// Stable one-byte tag; shared by the tagged block encoding and row hashing.
    pub fn type_tag(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Bool(_) => 1,
            Scalar::I64(_) => 2,
            Scalar::F64(_) => 3,
            Scalar::Str(_) => 4,
            Scalar::Bin(_) => 5,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Truthiness used by logical filters: non-zero numbers, `true`, and
    /// non-empty strings/binaries select a row.
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::I64(i) => *i != 0,
            Scalar::F64(f) => *f != 0.0 && !f.is_nan(),
            Scalar::Str(s) => !s.is_empty(),
            Scalar::Bin(b) => !b.is_empty(),
        }
    }

    /// Rough in-memory footprint, used for block flush and cache accounting.
    pub fn approx_size(&self) -> usize {
        match self {
            Scalar::Null | Scalar::Bool(_) => 1,
            Scalar::I64(_) | Scalar::F64(_) => 8,
            Scalar::Str(s) => 8 + s.len(),
            Scalar::Bin(b) => 8 + b.len(),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I64(i) => write!(f, "{i}"),
            Scalar::F64(x) => write!(f, "{x}"),
            Scalar::Str(s) => f.write_str(s),
            Scalar::Bin(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Row-wise function used by transform nodes. Receives one row (one value per
/// input column) and produces one output value.
pub type RowFn = Arc<dyn Fn(&[Scalar]) -> Scalar + Send + Sync>;

/// Column-major batch of rows. Every column holds the same number of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<Vec<Scalar>>,
}

impl RowBatch {
    /// Empty batch with `num_columns` columns.
    pub fn new(num_columns: usize) -> Self {
        Self {
            columns: vec![Vec::new(); num_columns],
        }
    }

    pub fn with_capacity(num_columns: usize, rows: usize) -> Self {
        Self {
            columns: (0..num_columns).map(|_| Vec::with_capacity(rows)).collect(),
        }
    }

    /// Build from columns, checking they all have the same length.
    pub fn from_columns(columns: Vec<Vec<Scalar>>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let n = first.len();
            if let Some((i, c)) = columns.iter().enumerate().find(|(_, c)| c.len() != n) {
                return Err(Error::Shape(format!(
                    "column {i} has {} rows, expected {n}",
                    c.len()
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Drop all rows, keeping the column allocations.
    pub fn clear(&mut self) {
        for c in &mut self.columns {
            c.clear();
        }
    }

    pub fn push_row(&mut self, row: &[Scalar]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Shape(format!(
                "row has {} values, batch has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (c, v) in self.columns.iter_mut().zip(row) {
            c.push(v.clone());
        }
        Ok(())
    }

    pub fn row(&self, idx: usize) -> Vec<Scalar> {
        self.columns.iter().map(|c| c[idx].clone()).collect()
    }

    /// Copy of the rows in `range`.
    pub fn slice(&self, range: Range<usize>) -> RowBatch {
        RowBatch {
            columns: self
                .columns
                .iter()
                .map(|c| c[range.clone()].to_vec())
                .collect(),
        }
    }

    /// Append the rows `range` of `other` (same width).
    pub fn extend_from(&mut self, other: &RowBatch, range: Range<usize>) -> Result<()> {
        if other.num_columns() != self.num_columns() {
            return Err(Error::Shape(format!(
                "cannot append batch of width {} to width {}",
                other.num_columns(),
                self.num_columns()
            )));
        }
        for (dst, src) in self.columns.iter_mut().zip(&other.columns) {
            dst.extend_from_slice(&src[range.clone()]);
        }
        Ok(())
    }

    /// Move the first `n` rows out of `self` into a new batch.
    pub fn split_front(&mut self, n: usize) -> RowBatch {
        RowBatch {
            columns: self
                .columns
                .iter_mut()
                .map(|c| c.drain(..n.min(c.len())).collect())
                .collect(),
        }
    }

    /// Batch holding only the columns at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> RowBatch {
        RowBatch {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
        }
    }

    /// Side-by-side concatenation of batches with equal row counts.
    pub fn concat_columns(parts: &[&RowBatch]) -> Result<RowBatch> {
        let rows = parts.first().map(|b| b.num_rows()).unwrap_or(0);
        let mut columns = Vec::new();
        for p in parts {
            if p.num_rows() != rows {
                return Err(Error::Shape(format!(
                    "cannot concat batches with different row counts: {} vs {}",
                    rows,
                    p.num_rows()
                )));
            }
            columns.extend(p.columns.iter().cloned());
        }
        Ok(RowBatch { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> Vec<Scalar> {
        v.iter().map(|&i| Scalar::I64(i)).collect()
    }

    #[test]
    fn from_columns_rejects_ragged_input() {
        let err = RowBatch::from_columns(vec![ints(&[1, 2]), ints(&[1])]).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn split_front_moves_rows() {
        let mut b = RowBatch::from_columns(vec![ints(&[1, 2, 3]), ints(&[4, 5, 6])]).unwrap();
        let front = b.split_front(2);
        assert_eq!(front.columns, vec![ints(&[1, 2]), ints(&[4, 5])]);
        assert_eq!(b.columns, vec![ints(&[3]), ints(&[6])]);
    }

    #[test]
    fn concat_columns_checks_rows() {
        let a = RowBatch::from_columns(vec![ints(&[1, 2])]).unwrap();
        let b = RowBatch::from_columns(vec![ints(&[3])]).unwrap();
        assert!(RowBatch::concat_columns(&[&a, &b]).is_err());
        let c = RowBatch::concat_columns(&[&a, &a]).unwrap();
        assert_eq!(c.num_columns(), 2);
        assert_eq!(c.num_rows(), 2);
    }

    #[test]
    fn truthiness() {
        assert!(Scalar::I64(-1).is_truthy());
        assert!(!Scalar::I64(0).is_truthy());
        assert!(!Scalar::Null.is_truthy());
        assert!(!Scalar::F64(f64::NAN).is_truthy());
        assert!(Scalar::Str("x".into()).is_truthy());
    }
}
