//! Element-wise combination of two single-column inputs.

use strata_core::ops::BinaryOp;

use crate::context::QueryContext;
use crate::traits::{OpError, Operator, Result};

pub struct BinaryTransform {
    op: BinaryOp,
}

impl BinaryTransform {
    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }

    fn misaligned() -> OpError {
        OpError::Exec("binary transform inputs have different lengths".into())
    }
}

impl Operator for BinaryTransform {
    fn name(&self) -> &'static str {
        "binary_transform"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        if ctx.skip_requested() {
            return match (ctx.skip_next(0)?, ctx.skip_next(1)?) {
                (true, true) => ctx.emit_skipped().map(|_| ()),
                (false, false) => ctx.finish(),
                _ => Err(Self::misaligned()),
            };
        }
        let (left, right) = match (ctx.get_next(0)?, ctx.get_next(1)?) {
            (Some(l), Some(r)) => (l, r),
            (None, None) => return ctx.finish(),
            _ => return Err(Self::misaligned()),
        };
        let (Some(l), Some(r)) = (left.columns.first(), right.columns.first()) else {
            return Err(OpError::Exec("binary transform input has no column".into()));
        };
        if l.len() != r.len() {
            return Err(Self::misaligned());
        }
        let mut buf = ctx.get_output_buffer()?;
        buf.columns[0].extend(l.iter().zip(r).map(|(a, b)| self.op.apply(a, b)));
        ctx.emit(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{blocks, concat, run};
    use strata_core::types::{RowBatch, Scalar};

    fn ints(v: impl Iterator<Item = i64>) -> RowBatch {
        RowBatch::from_columns(vec![v.map(Scalar::I64).collect()]).unwrap()
    }

    #[test]
    fn combines_rows_pairwise() {
        let mut op = BinaryTransform::new(BinaryOp::Mul);
        let out = run(&mut op, vec![blocks(&ints(0..7), 3), blocks(&ints(10..17), 3)], 3, 1).unwrap();
        assert_eq!(
            concat(&out, 1).columns[0],
            (0..7).map(|i| Scalar::I64(i * (i + 10))).collect::<Vec<_>>()
        );
    }

    #[test]
    fn uneven_inputs_fail() {
        let mut op = BinaryTransform::new(BinaryOp::Add);
        let res = run(&mut op, vec![blocks(&ints(0..6), 3), blocks(&ints(0..3), 3)], 3, 1);
        assert!(matches!(res, Err(OpError::Exec(_))));
    }
}
