//! The Query Context: pull/push protocol between an executor and one running
//! operator.
//!
//! Each operator instance owns a persistent [`ContextCore`] for the lifetime
//! of its segment. For every step the executor wraps it in a [`QueryContext`]
//! that borrows the upstream and downstream channels, calls
//! `Operator::execute` once and then checks the step with
//! [`ContextCore::end_step`].
//!
//! State machine:
//!
//! ```text
//! AwaitingInput -> Producing -> Emitted | Skipped -> AwaitingInput -> ...
//!                            \-> Finished (terminal)
//! ```
//!
//! Every emitted block holds exactly `block_size` rows, except the last block
//! of the stream which may be shorter. A context hands out a single output
//! buffer and it must be emitted or released before the step ends.
//!
//! The consumers answer every push with an [`EmitState`] about the producer's
//! next block. The context keeps that answer and applies it to its next step,
//! so an operator sees `skip_requested()` and skips its own inputs in turn.
//! Before the first step the initial state plays the same role.

use std::sync::Arc;

use strata_core::types::RowBatch;

use crate::traits::{OpError, Result};

/// Signal from consumers to a producer about the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitState {
    #[default]
    None,
    /// The consumers will not look at the next block's rows.
    SkipNextBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    AwaitingInput,
    Producing,
    Emitted,
    Skipped,
    Finished,
}

/// Result of one upstream pull.
#[derive(Debug, Clone)]
pub enum Pulled {
    Block(Arc<RowBatch>),
    /// The producer advanced by one block without materializing it.
    Skipped,
    End,
}

/// Where a context pulls input blocks from.
pub trait Upstream {
    /// Next block of input `input`. With `skip` set the caller does not need
    /// the rows and the producer may answer `Pulled::Skipped`.
    fn pull(&mut self, input: usize, skip: bool) -> Result<Pulled>;

    /// What the caller wants of the block after the next one `input`
    /// delivers. Producers receive it as the answer to that emit.
    fn set_next_state(&mut self, _input: usize, _state: EmitState) {}
}

/// Where a context pushes its output.
pub trait Downstream {
    /// `None` is a skipped placeholder block.
    fn push(&mut self, block: Option<RowBatch>) -> Result<EmitState>;
    fn end(&mut self) -> Result<()>;
}

/// What a finished step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Emitted,
    Skipped,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextCounters {
    pub steps: u64,
    pub blocks_in: u64,
    pub blocks_skipped_in: u64,
    pub blocks_out: u64,
    pub blocks_skipped_out: u64,
    pub rows_out: u64,
    /// Pushes the consumers answered with `SkipNextBlock`.
    pub skip_answers: u64,
}

/// Per-operator, per-segment protocol state that survives across steps.
pub struct ContextCore {
    block_size: usize,
    num_columns: usize,
    initial: EmitState,
    /// Consumers' answer to the last push, for the next step.
    answer: EmitState,
    skip_requested: bool,
    state: ContextState,
    spare: Option<RowBatch>,
    buffer_out: bool,
    short_emitted: bool,
    started: bool,
    counters: ContextCounters,
}

impl ContextCore {
    pub fn new(block_size: usize, num_columns: usize, initial: EmitState) -> Self {
        Self {
            block_size: block_size.max(1),
            num_columns,
            initial,
            answer: EmitState::None,
            skip_requested: false,
            state: ContextState::AwaitingInput,
            spare: None,
            buffer_out: false,
            short_emitted: false,
            started: false,
            counters: ContextCounters::default(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ContextState::Finished
    }

    pub fn counters(&self) -> ContextCounters {
        self.counters
    }

    pub fn initial_state(&self) -> EmitState {
        self.initial
    }

    /// Replace the initial state. Only meaningful before the first step.
    pub fn set_initial_state(&mut self, state: EmitState) -> Result<()> {
        if self.started {
            return Err(OpError::Protocol("initial state set after the first step".into()));
        }
        self.initial = state;
        Ok(())
    }

    /// Start a step. `skip` says whether the consumers want the block this
    /// step produces. The answer to the previous push (or the initial state
    /// before the first step) can also ask for a skip.
    pub fn begin_step(&mut self, skip: bool) -> Result<()> {
        if self.state == ContextState::Finished {
            return Err(OpError::Protocol("step requested after finish".into()));
        }
        let wanted = if self.started {
            std::mem::take(&mut self.answer)
        } else {
            self.initial
        };
        self.skip_requested = skip || wanted == EmitState::SkipNextBlock;
        self.state = ContextState::AwaitingInput;
        self.counters.steps += 1;
        Ok(())
    }

    /// Check the step that just ran and report what it did.
    pub fn end_step(&mut self) -> Result<StepOutcome> {
        self.started = true;
        if self.buffer_out {
            return Err(OpError::Protocol(
                "output buffer still held at the end of a step".into(),
            ));
        }
        match self.state {
            ContextState::Emitted => Ok(StepOutcome::Emitted),
            ContextState::Skipped => Ok(StepOutcome::Skipped),
            ContextState::Finished => Ok(StepOutcome::Finished),
            ContextState::AwaitingInput | ContextState::Producing => Err(OpError::Protocol(
                "step ended without emit, skip or finish".into(),
            )),
        }
    }

    fn note_answer(&mut self, state: EmitState) {
        if state == EmitState::SkipNextBlock {
            self.counters.skip_answers += 1;
        }
        self.answer = state;
    }

    /// Hand an emitted block's storage back for reuse.
    pub fn recycle(&mut self, mut batch: RowBatch) {
        if self.spare.is_none() && batch.num_columns() == self.num_columns {
            batch.clear();
            self.spare = Some(batch);
        }
    }
}

/// One step's view of a context.
pub struct QueryContext<'a> {
    core: &'a mut ContextCore,
    upstream: &'a mut dyn Upstream,
    downstream: &'a mut dyn Downstream,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        core: &'a mut ContextCore,
        upstream: &'a mut dyn Upstream,
        downstream: &'a mut dyn Downstream,
    ) -> Self {
        Self {
            core,
            upstream,
            downstream,
        }
    }

    pub fn block_size(&self) -> usize {
        self.core.block_size
    }

    pub fn num_columns(&self) -> usize {
        self.core.num_columns
    }

    /// Emit state to assume before the first input is pulled.
    pub fn initial_state(&self) -> EmitState {
        self.core.initial
    }

    /// Whether the consumers want this step's block skipped.
    pub fn skip_requested(&self) -> bool {
        self.core.skip_requested
    }

    /// Tell input `input` ahead of time what this operator wants of the block
    /// after the next one it pulls from there.
    pub fn set_input_state(&mut self, input: usize, state: EmitState) {
        self.upstream.set_next_state(input, state);
    }

    pub fn state(&self) -> ContextState {
        self.core.state
    }

    fn check_open(&self, what: &str) -> Result<()> {
        match self.core.state {
            ContextState::AwaitingInput | ContextState::Producing => Ok(()),
            s => Err(OpError::Protocol(format!("{what} in state {s:?}"))),
        }
    }

    /// Next block of input `input`, `None` at end of stream.
    pub fn get_next(&mut self, input: usize) -> Result<Option<Arc<RowBatch>>> {
        self.check_open("get_next")?;
        match self.upstream.pull(input, false)? {
            Pulled::Block(b) => {
                self.core.state = ContextState::Producing;
                self.core.counters.blocks_in += 1;
                Ok(Some(b))
            }
            Pulled::End => Ok(None),
            Pulled::Skipped => Err(OpError::Protocol(format!(
                "input {input} skipped a block that was requested"
            ))),
        }
    }

    /// Advance input `input` by one block without reading it. Returns false at
    /// end of stream.
    pub fn skip_next(&mut self, input: usize) -> Result<bool> {
        self.check_open("skip_next")?;
        match self.upstream.pull(input, true)? {
            Pulled::Block(_) | Pulled::Skipped => {
                self.core.state = ContextState::Producing;
                self.core.counters.blocks_skipped_in += 1;
                Ok(true)
            }
            Pulled::End => Ok(false),
        }
    }

    /// The context's output buffer, empty and `num_columns` wide.
    pub fn get_output_buffer(&mut self) -> Result<RowBatch> {
        if self.core.buffer_out {
            return Err(OpError::Protocol(
                "a second output buffer was requested while one is outstanding".into(),
            ));
        }
        self.core.buffer_out = true;
        let n = self.core.num_columns;
        Ok(match self.core.spare.take() {
            Some(mut b) if b.num_columns() == n => {
                b.clear();
                b
            }
            _ => RowBatch::with_capacity(n, self.core.block_size),
        })
    }

    /// Give back a buffer that will not be emitted.
    pub fn release_output_buffer(&mut self, buffer: RowBatch) {
        self.core.buffer_out = false;
        self.core.recycle(buffer);
    }

    fn check_emit(&self) -> Result<()> {
        match self.core.state {
            ContextState::Emitted | ContextState::Skipped => {
                return Err(OpError::Protocol("second emit in one step".into()))
            }
            ContextState::Finished => {
                return Err(OpError::Protocol("emit after finish".into()))
            }
            _ => {}
        }
        if self.core.short_emitted {
            return Err(OpError::Protocol(
                "emit after a short block; only the last block may be short".into(),
            ));
        }
        Ok(())
    }

    /// Push one block. It must hold exactly `block_size` rows unless it is the
    /// last block of the stream. The returned answer also applies to this
    /// context's next step.
    pub fn emit(&mut self, block: RowBatch) -> Result<EmitState> {
        self.check_emit()?;
        let rows = block.num_rows();
        if rows == 0 {
            return Err(OpError::Protocol("empty block emitted".into()));
        }
        if rows > self.core.block_size {
            return Err(OpError::Protocol(format!(
                "block of {rows} rows exceeds block size {}",
                self.core.block_size
            )));
        }
        if block.num_columns() != self.core.num_columns {
            return Err(OpError::Protocol(format!(
                "block has {} columns, operator produces {}",
                block.num_columns(),
                self.core.num_columns
            )));
        }
        if rows < self.core.block_size {
            self.core.short_emitted = true;
        }
        self.core.buffer_out = false;
        self.core.state = ContextState::Emitted;
        self.core.counters.blocks_out += 1;
        self.core.counters.rows_out += rows as u64;
        let state = self.downstream.push(Some(block))?;
        self.core.note_answer(state);
        Ok(state)
    }

    /// Push a placeholder for a block the consumers asked to skip.
    pub fn emit_skipped(&mut self) -> Result<EmitState> {
        self.check_emit()?;
        if !self.core.skip_requested {
            return Err(OpError::Protocol(
                "block skipped although the consumers want it".into(),
            ));
        }
        self.core.state = ContextState::Skipped;
        self.core.counters.blocks_skipped_out += 1;
        let state = self.downstream.push(None)?;
        self.core.note_answer(state);
        Ok(state)
    }

    /// End of this operator's stream.
    pub fn finish(&mut self) -> Result<()> {
        if self.core.state == ContextState::Finished {
            return Ok(());
        }
        self.core.state = ContextState::Finished;
        self.downstream.end()
    }
}

/// Upstream with no inputs, for sources.
pub struct NoUpstream;

impl Upstream for NoUpstream {
    fn pull(&mut self, input: usize, _skip: bool) -> Result<Pulled> {
        Err(OpError::Protocol(format!("source operators have no input {input}")))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Single-operator driver over in-memory inputs.

    use std::collections::VecDeque;

    use super::*;
    use crate::traits::Operator;

    pub struct VecUpstream {
        pub inputs: Vec<VecDeque<Arc<RowBatch>>>,
        pub skips: usize,
    }

    impl Upstream for VecUpstream {
        fn pull(&mut self, input: usize, skip: bool) -> Result<Pulled> {
            let q = self
                .inputs
                .get_mut(input)
                .ok_or_else(|| OpError::Protocol(format!("no input {input}")))?;
            Ok(match q.pop_front() {
                Some(_) if skip => {
                    self.skips += 1;
                    Pulled::Skipped
                }
                Some(b) => Pulled::Block(b),
                None => Pulled::End,
            })
        }
    }

    #[derive(Default)]
    pub struct Collect {
        pub blocks: Vec<Option<RowBatch>>,
        pub ended: bool,
    }

    impl Downstream for Collect {
        fn push(&mut self, block: Option<RowBatch>) -> Result<EmitState> {
            self.blocks.push(block);
            Ok(EmitState::None)
        }
        fn end(&mut self) -> Result<()> {
            self.ended = true;
            Ok(())
        }
    }

    /// Split `batch` into blocks of `bs` rows.
    pub fn blocks(batch: &RowBatch, bs: usize) -> VecDeque<Arc<RowBatch>> {
        let mut out = VecDeque::new();
        let mut start = 0;
        while start < batch.num_rows() {
            let end = (start + bs).min(batch.num_rows());
            out.push_back(Arc::new(batch.slice(start..end)));
            start = end;
        }
        out
    }

    /// Step `op` until it finishes and return everything it emitted.
    pub fn run(
        op: &mut dyn Operator,
        inputs: Vec<VecDeque<Arc<RowBatch>>>,
        block_size: usize,
        width: usize,
    ) -> Result<Vec<Option<RowBatch>>> {
        let mut up = VecUpstream { inputs, skips: 0 };
        let mut down = Collect::default();
        let mut core = ContextCore::new(block_size, width, EmitState::None);
        for _ in 0..10_000 {
            core.begin_step(false)?;
            let mut ctx = QueryContext::new(&mut core, &mut up, &mut down);
            op.execute(&mut ctx)?;
            if core.end_step()? == StepOutcome::Finished {
                return Ok(down.blocks);
            }
        }
        Err(OpError::Exec("operator did not finish".into()))
    }

    /// Concatenate emitted blocks row-wise.
    pub fn concat(blocks: &[Option<RowBatch>], width: usize) -> RowBatch {
        let mut out = RowBatch::new(width);
        for b in blocks.iter().flatten() {
            out.extend_from(b, 0..b.num_rows()).unwrap();
        }
        out
    }
}
