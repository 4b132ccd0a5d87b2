//! Column projection.

use crate::context::QueryContext;
use crate::traits::{OpError, Operator, Result};

pub struct Project {
    indices: Vec<usize>,
}

impl Project {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }
}

impl Operator for Project {
    fn name(&self) -> &'static str {
        "project"
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
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= input.num_columns()) {
            return Err(OpError::Exec(format!(
                "project index {bad} out of range for {} input columns",
                input.num_columns()
            )));
        }
        let mut buf = ctx.get_output_buffer()?;
        for (dst, &i) in buf.columns.iter_mut().zip(&self.indices) {
            dst.extend_from_slice(&input.columns[i]);
        }
        ctx.emit(buf)?;
        Ok(())
    }
}
