//! Row-wise function producing one output column.

use strata_core::types::{RowFn, Scalar};

use crate::context::QueryContext;
use crate::traits::{Operator, Result};

pub struct Transform {
    f: RowFn,
    row: Vec<Scalar>,
}

impl Transform {
    pub fn new(f: RowFn) -> Self {
        Self { f, row: Vec::new() }
    }
}

impl Operator for Transform {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        if ctx.skip_requested() {
            return if ctx.skip_next(0)? {
                ctx.emit_skipped().map(|_| ())
            } else {
                ctx.finish()
            };
        }
        let Some(input) = ctx.get_next(0)? else {
            return ctx.finish();
        };
        let mut buf = ctx.get_output_buffer()?;
        let out = &mut buf.columns[0];
        for r in 0..input.num_rows() {
            self.row.clear();
            self.row.extend(input.columns.iter().map(|c| c[r].clone()));
            out.push((self.f)(&self.row));
        }
        ctx.emit(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{blocks, concat, run};
    use std::sync::Arc;
    use strata_core::types::RowBatch;

    #[test]
    fn applies_function_per_row() {
        let input = RowBatch::from_columns(vec![
            (0..5).map(Scalar::I64).collect(),
            (0..5).map(|i| Scalar::I64(i * 10)).collect(),
        ])
        .unwrap();
        let sum: RowFn = Arc::new(|row: &[Scalar]| match (&row[0], &row[1]) {
            (Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a + b),
            _ => Scalar::Null,
        });
        let mut op = Transform::new(sum);
        let got = concat(&run(&mut op, vec![blocks(&input, 2)], 2, 1).unwrap(), 1);
        assert_eq!(
            got.columns[0],
            vec![0, 11, 22, 33, 44].into_iter().map(Scalar::I64).collect::<Vec<_>>()
        );
    }
}
