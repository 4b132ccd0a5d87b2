//! Source operators: table scans, index ranges and constants.
//!
//! A source covers rows `[begin, end)` and emits them in blocks of the
//! context's block size. When the consumers ask for a skip, the source only
//! advances its position.

use strata_core::types::Scalar;
use strata_storage::{Table, TableReader};

use crate::context::QueryContext;
use crate::traits::{OpError, Operator, Result};

struct Cursor {
    pos: u64,
    end: u64,
}

impl Cursor {
    fn new(begin: u64, end: u64) -> Result<Self> {
        if begin > end {
            return Err(OpError::Plan(format!("source range [{begin}, {end}) is reversed")));
        }
        Ok(Self { pos: begin, end })
    }

    /// Rows of the next block, `None` when exhausted.
    fn next(&mut self, block_size: usize) -> Option<(u64, u64)> {
        if self.pos >= self.end {
            return None;
        }
        let lo = self.pos;
        let hi = (lo + block_size as u64).min(self.end);
        self.pos = hi;
        Some((lo, hi))
    }
}

/// Scan of rows `[begin, end)` of a table.
pub struct TableSource {
    reader: TableReader,
    cursor: Cursor,
}

impl TableSource {
    pub fn new(table: &Table, begin: u64, end: u64) -> Result<Self> {
        if end > table.num_rows() {
            return Err(OpError::Plan(format!(
                "table source end {end} is past the table's {} rows",
                table.num_rows()
            )));
        }
        Ok(Self {
            reader: table.reader()?,
            cursor: Cursor::new(begin, end)?,
        })
    }
}

impl Operator for TableSource {
    fn name(&self) -> &'static str {
        "table_source"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        let Some((lo, hi)) = self.cursor.next(ctx.block_size()) else {
            return ctx.finish();
        };
        if ctx.skip_requested() {
            ctx.emit_skipped()?;
            return Ok(());
        }
        let mut buf = ctx.get_output_buffer()?;
        if let Err(e) = self.reader.read_into(lo, hi, &mut buf) {
            ctx.release_output_buffer(buf);
            return Err(e.into());
        }
        ctx.emit(buf)?;
        Ok(())
    }
}

/// Row index as an `I64` column: row `i` holds `i`.
pub struct RangeSource {
    cursor: Cursor,
}

impl RangeSource {
    pub fn new(begin: u64, end: u64) -> Result<Self> {
        Ok(Self {
            cursor: Cursor::new(begin, end)?,
        })
    }
}

impl Operator for RangeSource {
    fn name(&self) -> &'static str {
        "range"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        let Some((lo, hi)) = self.cursor.next(ctx.block_size()) else {
            return ctx.finish();
        };
        if ctx.skip_requested() {
            ctx.emit_skipped()?;
            return Ok(());
        }
        let mut buf = ctx.get_output_buffer()?;
        buf.columns[0].extend((lo..hi).map(|i| Scalar::I64(i as i64)));
        ctx.emit(buf)?;
        Ok(())
    }
}

/// The same value in every row.
pub struct ConstantSource {
    value: Scalar,
    cursor: Cursor,
}

impl ConstantSource {
    pub fn new(value: Scalar, begin: u64, end: u64) -> Result<Self> {
        Ok(Self {
            value,
            cursor: Cursor::new(begin, end)?,
        })
    }
}

impl Operator for ConstantSource {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        let Some((lo, hi)) = self.cursor.next(ctx.block_size()) else {
            return ctx.finish();
        };
        if ctx.skip_requested() {
            ctx.emit_skipped()?;
            return Ok(());
        }
        let mut buf = ctx.get_output_buffer()?;
        buf.columns[0].resize((hi - lo) as usize, self.value.clone());
        ctx.emit(buf)?;
        Ok(())
    }
}
