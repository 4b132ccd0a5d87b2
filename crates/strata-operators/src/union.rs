//! Column-wise concatenation of inputs that advance in lockstep.

use std::sync::Arc;

use strata_core::types::RowBatch;

use crate::context::QueryContext;
use crate::traits::{OpError, Operator, Result};

pub struct Union {
    num_inputs: usize,
}

impl Union {
    pub fn new(num_inputs: usize) -> Self {
        Self { num_inputs }
    }

    fn misaligned() -> OpError {
        OpError::Exec("union inputs have different lengths".into())
    }
}

impl Operator for Union {
    fn name(&self) -> &'static str {
        "union"
    }

    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn execute(&mut self, ctx: &mut QueryContext<'_>) -> Result<()> {
        if ctx.skip_requested() {
            let mut more = Vec::with_capacity(self.num_inputs);
            for i in 0..self.num_inputs {
                more.push(ctx.skip_next(i)?);
            }
            return match (more.iter().all(|&m| m), more.iter().any(|&m| m)) {
                (true, _) => ctx.emit_skipped().map(|_| ()),
                (false, false) => ctx.finish(),
                (false, true) => Err(Self::misaligned()),
            };
        }

        let mut parts: Vec<Arc<RowBatch>> = Vec::with_capacity(self.num_inputs);
        for i in 0..self.num_inputs {
            if let Some(b) = ctx.get_next(i)? {
                parts.push(b);
            }
        }
        if parts.is_empty() {
            return ctx.finish();
        }
        let rows = parts[0].num_rows();
        if parts.len() != self.num_inputs || parts.iter().any(|p| p.num_rows() != rows) {
            return Err(Self::misaligned());
        }
        let mut buf = ctx.get_output_buffer()?;
        let mut dst = buf.columns.iter_mut();
        for part in &parts {
            for src in &part.columns {
                match dst.next() {
                    Some(d) => d.extend_from_slice(src),
                    None => {
                        ctx.release_output_buffer(buf);
                        return Err(OpError::Exec("union inputs are wider than its output".into()));
                    }
                }
            }
        }
        ctx.emit(buf)?;
        Ok(())
    }
}
