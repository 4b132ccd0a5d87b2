//! Logical filter: keeps the data rows whose mask value is truthy.
//!
//! Input 0 is the data, input 1 a single-column mask advancing in lockstep
//! with it. Selected rows are carried over between steps so every emitted
//! block except the last is full. A mask block with no selected row lets the
//! filter skip the matching data block.
//!
//! The mask is read one block ahead of the data. When the next mask block
//! selects nothing, the data input is told before it delivers the current
//! block, so its producer learns from the answer to that emit that the block
//! after it is not wanted.

use std::sync::Arc;

use strata_core::types::{RowBatch, Scalar};

use crate::context::{EmitState, QueryContext};
use crate::traits::{OpError, Operator, Result};

pub struct LogicalFilter {
    pending: Option<RowBatch>,
    /// Mask block pulled ahead of its data block.
    next_mask: Option<Arc<RowBatch>>,
    mask_done: bool,
    inputs_done: bool,
    rows_dropped: u64,
}

fn selects_nothing(mask: &RowBatch) -> bool {
    mask.columns
        .first()
        .is_some_and(|m| !m.iter().any(Scalar::is_truthy))
}

impl LogicalFilter {
    pub fn new() -> Self {
        Self {
            pending: None,
            next_mask: None,
            mask_done: false,
            inputs_done: false,
            rows_dropped: 0,
        }
    }

    fn pull_mask(&mut self, ctx: &mut QueryContext<'_>) -> Result<Option<Arc<RowBatch>>> {
        if let Some(mask) = self.next_mask.take() {
            return Ok(Some(mask));
        }
        if self.mask_done {
            return Ok(None);
        }
        let mask = ctx.get_next(1)?;
        self.mask_done = mask.is_none();
        Ok(mask)
    }

    fn look_ahead(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        if self.mask_done {
            return Ok(());
        }
        self.next_mask = ctx.get_next(1)?;
        match &self.next_mask {
            None => self.mask_done = true,
            Some(next) if selects_nothing(next) => {
                ctx.set_input_state(0, EmitState::SkipNextBlock)
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn rows_dropped(&self) -> u64 {
        self.rows_dropped
    }

    fn fill(
        &mut self,
        ctx: &mut QueryContext<'_>,
        pending: &mut RowBatch,
        bs: usize,
        width: usize,
    ) -> Result<()> {
        while !self.inputs_done && pending.num_rows() < bs {
            let Some(mask) = self.pull_mask(ctx)? else {
                if ctx.skip_next(0)? {
                    return Err(OpError::Exec("filter data is longer than its mask".into()));
                }
                self.inputs_done = true;
                break;
            };
            let m = mask
                .columns
                .first()
                .ok_or_else(|| OpError::Exec("filter mask has no column".into()))?;
            if !m.iter().any(|v| v.is_truthy()) {
                if !ctx.skip_next(0)? {
                    return Err(OpError::Exec("filter mask is longer than its data".into()));
                }
                self.rows_dropped += m.len() as u64;
                continue;
            }
            self.look_ahead(ctx)?;
            let data = ctx
                .get_next(0)?
                .ok_or_else(|| OpError::Exec("filter mask is longer than its data".into()))?;
            if data.num_rows() != m.len() {
                return Err(OpError::Exec(format!(
                    "filter data block has {} rows, mask block {}",
                    data.num_rows(),
                    m.len()
                )));
            }
            if data.num_columns() != width {
                return Err(OpError::Exec(format!(
                    "filter data has {} columns, expected {width}",
                    data.num_columns()
                )));
            }
            for (dst, src) in pending.columns.iter_mut().zip(&data.columns) {
                dst.extend(
                    src.iter()
                        .zip(m)
                        .filter(|(_, keep)| keep.is_truthy())
                        .map(|(v, _)| v.clone()),
                );
            }
            self.rows_dropped += m.iter().filter(|v| !v.is_truthy()).count() as u64;
        }
        Ok(())
    }
}

impl Default for LogicalFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for LogicalFilter {
    fn name(&self) -> &'static str {
        "logical_filter"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        let bs = ctx.block_size();
        let width = ctx.num_columns();
        let mut pending = self.pending.take().unwrap_or_else(|| RowBatch::new(width));
        self.fill(ctx, &mut pending, bs, width)?;

        if pending.is_empty() {
            tracing::trace!(dropped = self.rows_dropped, "logical filter finished");
            return ctx.finish();
        }
        let take = pending.num_rows().min(bs);
        let mut buf = ctx.get_output_buffer()?;
        if let Err(e) = buf.extend_from(&pending, 0..take) {
            ctx.release_output_buffer(buf);
            return Err(e.into());
        }
        pending.split_front(take);
        self.pending = Some(pending);
        ctx.emit(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{blocks, concat, run};
    use strata_core::types::Scalar;

    fn ints(v: impl Iterator<Item = i64>) -> RowBatch {
        RowBatch::from_columns(vec![v.map(Scalar::I64).collect()]).unwrap()
    }

    #[test]
    fn keeps_truthy_rows_in_full_blocks() {
        let data = ints(0..20);
        let mask = ints((0..20).map(|i| (i % 3 == 0) as i64));
        let mut op = LogicalFilter::new();
        let out = run(&mut op, vec![blocks(&data, 4), blocks(&mask, 4)], 4, 1).unwrap();
        let sizes: Vec<_> = out.iter().flatten().map(|b| b.num_rows()).collect();
        assert_eq!(sizes, vec![4, 3]);
        assert_eq!(
            concat(&out, 1).columns[0],
            [0, 3, 6, 9, 12, 15, 18].map(Scalar::I64).to_vec()
        );
        assert_eq!(op.rows_dropped(), 13);
    }

    #[test]
    fn all_false_mask_blocks_skip_data() {
        let data = ints(0..8);
        let mask = ints((0..8).map(|i| (i >= 6) as i64));
        let mut op = LogicalFilter::new();
        let mut up = crate::context::testing::VecUpstream {
            inputs: vec![blocks(&data, 2), blocks(&mask, 2)],
            skips: 0,
        };
        let mut down = crate::context::testing::Collect::default();
        let mut core = crate::context::ContextCore::new(2, 1, Default::default());
        loop {
            core.begin_step(false).unwrap();
            let mut ctx = QueryContext::new(&mut core, &mut up, &mut down);
            op.execute(&mut ctx).unwrap();
            if core.end_step().unwrap() == crate::context::StepOutcome::Finished {
                break;
            }
        }
        assert_eq!(up.skips, 3);
        assert_eq!(concat(&down.blocks, 1).columns[0], vec![Scalar::I64(6), Scalar::I64(7)]);
    }

    #[test]
    fn mask_shorter_than_data_fails() {
        let mut op = LogicalFilter::new();
        let res = run(
            &mut op,
            vec![blocks(&ints(0..4), 2), blocks(&ints([1, 1].into_iter()), 2)],
            2,
            1,
        );
        assert!(matches!(res, Err(OpError::Exec(_))));
    }
}
