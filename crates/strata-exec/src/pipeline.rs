//! Single-segment executor for a linear operator graph.
//!
//! Every graph node becomes one stage: an operator plus its persistent
//! `ContextCore`. Execution is pull-driven from the root. When a stage asks
//! for input, the producing stage is stepped until it has a block the
//! consumer has not seen yet. Blocks are kept in the producer's outbox until
//! every consumer edge has moved past them, so shared sub-graphs run once.
//!
//! Skips only travel along edges of producers with a single consumer; with
//! several consumers one of them may still want the rows. The same holds for
//! the answers a consumer gives ahead of time: an edge keeps the state its
//! consumer announced and returns it to the producer from the next push. A
//! filter whose constant mask selects nothing makes its data producer start
//! with `SkipNextBlock`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use strata_core::id::NodeId;
use strata_core::types::{RowBatch, Scalar};
use strata_operators::{
    BinaryTransform, ConstantSource, ContextCore, ContextCounters, Downstream, EmitState,
    LogicalFilter, OpError, Operator, Project, Pulled, QueryContext, RangeSource, StepOutcome,
    TableSource, Transform, Union, Upstream,
};
use strata_planner::node::VALUE;
use strata_planner::{
    num_columns, selects_nothing, NodePayload, NodeRef, OperatorKind, ParamValue,
};

use crate::error::{ExecError, Result};

type OpResult<T> = strata_operators::Result<T>;

/// Destination of a segment's output blocks.
pub(crate) trait BlockOutput {
    /// Returns `true` when no further blocks are wanted.
    fn write(&mut self, block: &RowBatch) -> OpResult<bool>;
}

impl BlockOutput for strata_storage::SegmentOutput {
    fn write(&mut self, block: &RowBatch) -> OpResult<bool> {
        self.write_batch(block)?;
        Ok(false)
    }
}

/// Row and step totals of one segment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub rows_out: u64,
    pub blocks_out: u64,
    pub steps: u64,
    pub blocks_skipped: u64,
    /// Pushes answered with `SkipNextBlock` by the consumers.
    pub skip_answers: u64,
    pub stopped_early: bool,
}

struct Stage {
    name: &'static str,
    node: NodeId,
    filter_selects_nothing: bool,
    runner: Option<(Box<dyn Operator>, ContextCore)>,
    input_edges: Vec<usize>,
    consumer_edges: Vec<usize>,
    outbox: VecDeque<Option<Arc<RowBatch>>>,
    /// Sequence number of `outbox[0]`.
    base_seq: u64,
    ended: bool,
}

struct Edge {
    producer: usize,
    next_seq: u64,
    /// Answer for the producer's next push, announced by the consumer.
    answer: EmitState,
}

pub(crate) struct SegmentPipeline {
    segment: usize,
    stages: Vec<Stage>,
    edges: Vec<Edge>,
    root: usize,
}

/// Operator instance for one planner node.
fn instantiate(node: &NodeRef) -> Result<Box<dyn Operator>> {
    let op: Box<dyn Operator> = match node.kind() {
        OperatorKind::TableSource => {
            let (b, e) = node.source_range()?;
            Box::new(TableSource::new(node.table()?, b, e)?)
        }
        OperatorKind::Range => {
            let (b, e) = node.source_range()?;
            Box::new(RangeSource::new(b, e)?)
        }
        OperatorKind::Constant => {
            let (b, e) = node.source_range()?;
            let value = match node.param(VALUE) {
                Some(ParamValue::Scalar(v)) => v.clone(),
                _ => Scalar::Null,
            };
            Box::new(ConstantSource::new(value, b, e)?)
        }
        OperatorKind::Project => Box::new(Project::new(node.indices()?.to_vec())),
        OperatorKind::Union => Box::new(Union::new(node.inputs().len())),
        OperatorKind::LogicalFilter => Box::new(LogicalFilter::new()),
        OperatorKind::Transform => match node.payload() {
            NodePayload::Transform { f, .. } => Box::new(Transform::new(Arc::clone(f))),
            _ => {
                return Err(ExecError::Invalid(format!(
                    "transform {} has no function",
                    node.id()
                )))
            }
        },
        OperatorKind::BinaryTransform => Box::new(BinaryTransform::new(node.binary_op()?)),
        OperatorKind::Append => {
            return Err(ExecError::Invalid(format!(
                "append {} reached a segment pipeline; it must be materialized first",
                node.id()
            )))
        }
    };
    Ok(op)
}

impl SegmentPipeline {
    pub(crate) fn build(root: &NodeRef, segment: usize, block_size: usize) -> Result<Self> {
        let mut p = Self {
            segment,
            stages: Vec::new(),
            edges: Vec::new(),
            root: 0,
        };
        p.root = p.add(root, block_size, &mut HashMap::new())?;
        p.apply_initial_states(root)?;
        Ok(p)
    }

    /// Data producers of filters that select nothing start out skipping.
    fn apply_initial_states(&mut self, root: &NodeRef) -> Result<()> {
        let mut skipped = Vec::new();
        for stage in &self.stages {
            let Some(&edge) = stage.input_edges.first() else {
                continue;
            };
            let producer = self.edges[edge].producer;
            if stage.filter_selects_nothing && self.stages[producer].consumer_edges.len() == 1 {
                skipped.push(producer);
            }
        }
        for ix in skipped {
            if let Some((_, core)) = self.stages[ix].runner.as_mut() {
                core.set_initial_state(EmitState::SkipNextBlock)?;
            }
        }
        tracing::trace!(segment = self.segment, root = %root.id(), "pipeline built");
        Ok(())
    }

    fn add(&mut self, node: &NodeRef, block_size: usize, index: &mut HashMap<NodeId, usize>) -> Result<usize> {
        if let Some(&ix) = index.get(&node.id()) {
            return Ok(ix);
        }
        let mut input_edges = Vec::with_capacity(node.inputs().len());
        for input in node.inputs() {
            let producer = self.add(input, block_size, index)?;
            self.edges.push(Edge {
                producer,
                next_seq: 0,
                answer: EmitState::None,
            });
            let edge = self.edges.len() - 1;
            self.stages[producer].consumer_edges.push(edge);
            input_edges.push(edge);
        }
        let op = instantiate(node)?;
        let core = ContextCore::new(block_size, num_columns(node)?, EmitState::None);
        self.stages.push(Stage {
            name: op.name(),
            node: node.id(),
            filter_selects_nothing: selects_nothing(node),
            runner: Some((op, core)),
            input_edges,
            consumer_edges: Vec::new(),
            outbox: VecDeque::new(),
            base_seq: 0,
            ended: false,
        });
        let ix = self.stages.len() - 1;
        index.insert(node.id(), ix);
        Ok(ix)
    }

    /// Step the root until it finishes or the output asks to stop.
    pub(crate) fn run(mut self, out: &mut dyn BlockOutput) -> Result<SegmentStats> {
        let mut stats = SegmentStats::default();
        let root = self.root;
        loop {
            let mut sink = SinkDownstream {
                out: &mut *out,
                stop: false,
                last: None,
            };
            let outcome = self.step(root, false, &mut sink).map_err(|e| {
                tracing::debug!(segment = self.segment, error = %e, "segment failed");
                ExecError::from(e)
            })?;
            let stop = sink.stop;
            if let Some(batch) = sink.last.take() {
                stats.rows_out += batch.num_rows() as u64;
                stats.blocks_out += 1;
                if let Some((_, core)) = self.stages[root].runner.as_mut() {
                    core.recycle(batch);
                }
            }
            if outcome == StepOutcome::Finished {
                break;
            }
            if stop {
                stats.stopped_early = true;
                tracing::debug!(segment = self.segment, "output stopped the segment early");
                break;
            }
        }
        for stage in &self.stages {
            if let Some((_, core)) = &stage.runner {
                let c: ContextCounters = core.counters();
                stats.steps += c.steps;
                stats.blocks_skipped += c.blocks_skipped_out;
                stats.skip_answers += c.skip_answers;
                tracing::trace!(
                    segment = self.segment,
                    node = %stage.node,
                    op = stage.name,
                    steps = c.steps,
                    rows_out = c.rows_out,
                    skipped = c.blocks_skipped_out,
                    "stage finished"
                );
            }
        }
        Ok(stats)
    }

    /// One step of stage `ix`, pushing into `down`.
    fn step(&mut self, ix: usize, skip: bool, down: &mut dyn Downstream) -> OpResult<StepOutcome> {
        self.trim(ix);
        let (mut op, mut core) = self.stages[ix].runner.take().ok_or_else(|| {
            OpError::Protocol(format!("{} stage re-entered while running", self.stages[ix].name))
        })?;
        let edges = self.stages[ix].input_edges.clone();
        let result = self.run_step(op.as_mut(), &mut core, &edges, skip, down);
        self.stages[ix].runner = Some((op, core));
        result
    }

    fn run_step(
        &mut self,
        op: &mut dyn Operator,
        core: &mut ContextCore,
        edges: &[usize],
        skip: bool,
        down: &mut dyn Downstream,
    ) -> OpResult<StepOutcome> {
        core.begin_step(skip)?;
        let mut up = EdgeUpstream {
            pipeline: self,
            edges,
        };
        let mut ctx = QueryContext::new(core, &mut up, down);
        op.execute(&mut ctx)?;
        core.end_step()
    }

    fn pull(&mut self, edge: usize, skip: bool) -> OpResult<Pulled> {
        let producer = self.edges[edge].producer;
        let mut answer = std::mem::take(&mut self.edges[edge].answer);
        loop {
            let seq = self.edges[edge].next_seq;
            let stage = &self.stages[producer];
            let offset = seq.saturating_sub(stage.base_seq) as usize;
            if let Some(item) = stage.outbox.get(offset) {
                let pulled = match item {
                    Some(b) => Pulled::Block(Arc::clone(b)),
                    None => Pulled::Skipped,
                };
                self.edges[edge].next_seq += 1;
                return Ok(pulled);
            }
            if stage.ended {
                return Ok(Pulled::End);
            }
            let single = stage.consumer_edges.len() == 1;
            let skip_producer = skip && single;
            let mut outbox = StageOutbox {
                answer: if single {
                    std::mem::take(&mut answer)
                } else {
                    EmitState::None
                },
                ..StageOutbox::default()
            };
            self.step(producer, skip_producer, &mut outbox)?;
            let stage = &mut self.stages[producer];
            if let Some(block) = outbox.pushed {
                stage.outbox.push_back(block.map(Arc::new));
            }
            if outbox.ended {
                stage.ended = true;
            }
        }
    }

    /// Drop outbox blocks every consumer has moved past and hand their
    /// storage back to the producer when nobody else holds it.
    fn trim(&mut self, ix: usize) {
        let Some(min_seq) = self.stages[ix]
            .consumer_edges
            .iter()
            .map(|&e| self.edges[e].next_seq)
            .min()
        else {
            return;
        };
        let stage = &mut self.stages[ix];
        while stage.base_seq < min_seq {
            let Some(front) = stage.outbox.pop_front() else {
                break;
            };
            stage.base_seq += 1;
            if let Some(Ok(batch)) = front.map(Arc::try_unwrap) {
                if let Some((_, core)) = stage.runner.as_mut() {
                    core.recycle(batch);
                }
            }
        }
    }
}

struct EdgeUpstream<'p> {
    pipeline: &'p mut SegmentPipeline,
    edges: &'p [usize],
}

impl Upstream for EdgeUpstream<'_> {
    fn pull(&mut self, input: usize, skip: bool) -> OpResult<Pulled> {
        let edge = *self
            .edges
            .get(input)
            .ok_or_else(|| OpError::Protocol(format!("operator has no input {input}")))?;
        self.pipeline.pull(edge, skip)
    }

    fn set_next_state(&mut self, input: usize, state: EmitState) {
        if let Some(&edge) = self.edges.get(input) {
            self.pipeline.edges[edge].answer = state;
        }
    }
}

/// Collects what an inner stage pushed during one step.
#[derive(Default)]
struct StageOutbox {
    pushed: Option<Option<RowBatch>>,
    ended: bool,
    /// What the single consumer announced for the block after this one.
    answer: EmitState,
}

impl Downstream for StageOutbox {
    fn push(&mut self, block: Option<RowBatch>) -> OpResult<EmitState> {
        self.pushed = Some(block);
        Ok(self.answer)
    }

    fn end(&mut self) -> OpResult<()> {
        self.ended = true;
        Ok(())
    }
}

/// Downstream of the root stage: writes blocks to the segment's output.
struct SinkDownstream<'o> {
    out: &'o mut dyn BlockOutput,
    stop: bool,
    last: Option<RowBatch>,
}

impl Downstream for SinkDownstream<'_> {
    fn push(&mut self, block: Option<RowBatch>) -> OpResult<EmitState> {
        let block = block.ok_or_else(|| {
            OpError::Protocol("the root operator skipped a block nobody asked to skip".into())
        })?;
        self.stop = self.out.write(&block)?;
        self.last = Some(block);
        Ok(if self.stop {
            EmitState::SkipNextBlock
        } else {
            EmitState::None
        })
    }

    fn end(&mut self) -> OpResult<()> {
        Ok(())
    }
}
