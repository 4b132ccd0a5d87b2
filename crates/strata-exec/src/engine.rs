//! The materialization engine.
//!
//! `Engine` owns the worker pool, the block store and the download cache.
//! `materialize` turns a lazy graph into a table:
//!
//! 1. optimization passes, unless disabled
//! 2. partial materialization of appends and rate-misaligned sub-graphs
//! 3. source length check
//! 4. one segmented copy of the graph per output segment
//! 5. one pipeline per segment on the worker pool, each writing its own
//!    segment of the output table or feeding the write callback

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::ThreadPool;
use uuid::Uuid;

use strata_core::config::EngineConfig;
use strata_core::schema::dedup_names;
use strata_core::types::RowBatch;
use strata_io::file_cache::{FileCache, LocalFileCache};
use strata_planner::{
    check_source_lengths, column_names, infer_length, is_sliceable, materialization_boundaries,
    num_columns, optimize, output_types, replace_nodes, segment_graph, slice_graph, table_source,
    Memo, NodeRef, OperatorKind, PlanError,
};
use strata_storage::{BlockStore, Table, TableWriter};

use crate::error::{ExecError, Result};
use crate::metrics;
use crate::options::{MaterializeOptions, WriteCallback};
use crate::pipeline::{BlockOutput, SegmentPipeline, SegmentStats};
use crate::scheduler;

pub struct Engine {
    cfg: EngineConfig,
    store: Arc<BlockStore>,
    pool: ThreadPool,
    file_cache: Arc<dyn FileCache>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        Self::with_file_cache(cfg, Arc::new(LocalFileCache::new()))
    }

    pub fn with_file_cache(cfg: EngineConfig, file_cache: Arc<dyn FileCache>) -> Result<Self> {
        cfg.validate()?;
        let store = Arc::new(BlockStore::new(&cfg)?);
        let pool = scheduler::build_pool(cfg.max_parallel_tasks)?;
        tracing::info!(
            workers = pool.current_num_threads(),
            block_size = cfg.block_size,
            codec = %cfg.codec,
            "engine started"
        );
        Ok(Self {
            cfg,
            store,
            pool,
            file_cache,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Evaluate `root` into a table.
    pub fn materialize(&self, root: &NodeRef, opts: &MaterializeOptions) -> Result<Table> {
        let span = tracing::info_span!("materialize", root = %root.id(), kind = %root.kind());
        let _guard = span.enter();
        metrics::timed("materialize", || {
            if opts.naive_mode {
                crate::naive::materialize(self, root, opts)
            } else {
                self.materialize_planned(root, opts)
            }
        })
    }

    /// Stream `root` through `callback` instead of writing a table.
    pub fn materialize_with_callback(
        &self,
        root: &NodeRef,
        callback: WriteCallback,
        num_segments: usize,
        opts: &MaterializeOptions,
    ) -> Result<()> {
        let opts = MaterializeOptions {
            write_callback: Some(callback),
            num_segments,
            ..opts.clone()
        };
        self.materialize(root, &opts).map(|_| ())
    }

    /// Materialize `root` and wrap the result as a table source.
    pub fn materialize_as_node(&self, root: &NodeRef) -> Result<NodeRef> {
        let table = self.materialize(root, &MaterializeOptions::default())?;
        Ok(table_source(&table))
    }

    /// Whether `root` has grown past the configured size or depth.
    pub fn online_materialization_recommended(&self, root: &NodeRef) -> bool {
        strata_planner::online_materialization_recommended(
            root,
            self.cfg.online_materialization_nodes,
            self.cfg.online_materialization_depth,
        )
    }

    /// Rows `[begin, end)` of `root` as a lazy graph. Shapes that cannot be
    /// sliced lazily are materialized first.
    pub fn slice(&self, root: &NodeRef, begin: u64, end: u64) -> Result<NodeRef> {
        let base = if is_sliceable(root) {
            Arc::clone(root)
        } else {
            tracing::debug!(root = %root.id(), "materializing before slicing");
            self.materialize_as_node(root)?
        };
        Ok(slice_graph(&base, begin, end, &mut Memo::new())?)
    }

    /// Whether two graphs produce the same number of rows. Unknown lengths
    /// are found by materializing.
    pub fn test_equal_length(&self, a: &NodeRef, b: &NodeRef) -> Result<bool> {
        if let (Some(x), Some(y)) = (infer_length(a)?, infer_length(b)?) {
            return Ok(x == y);
        }
        Ok(self.length(a)? == self.length(b)?)
    }

    fn length(&self, node: &NodeRef) -> Result<u64> {
        match infer_length(node)? {
            Some(n) => Ok(n),
            None => Ok(self.materialize(node, &MaterializeOptions::default())?.num_rows()),
        }
    }

    /// Open a table by index location through the download cache.
    pub fn open_table(&self, location: &str) -> Result<Table> {
        let path = self.file_cache.get_local_path(location)?;
        let table = Table::open(&self.store, &path);
        self.file_cache.release(location);
        Ok(table?)
    }

    /// Release pooled handles and cached blocks.
    pub fn shutdown(&self) {
        self.store.shutdown();
        tracing::info!("engine shut down");
    }

    /// Fresh index path in the temp directory. Tables written there are
    /// made temporary and removed once dropped.
    pub(crate) fn temp_index_path(&self) -> PathBuf {
        PathBuf::from(&self.cfg.temp_dir).join(format!("{}.sidx", Uuid::new_v4()))
    }

    fn materialize_planned(&self, root: &NodeRef, opts: &MaterializeOptions) -> Result<Table> {
        let mut plan = if opts.disable_optimization {
            Arc::clone(root)
        } else {
            let optimized = optimize(root, opts.only_first_pass_optimizations)?;
            if !Arc::ptr_eq(&optimized, root) {
                tracing::debug!(before = %root.id(), after = %optimized.id(), "plan optimized");
            }
            optimized
        };

        if plan.kind() == OperatorKind::Append {
            if !opts.partial_materialize {
                return Err(not_linear(&plan));
            }
            let table = self.materialize_append(&plan, opts)?;
            return self.finish_table(table, opts);
        }

        let boundaries = materialization_boundaries(&plan);
        if !boundaries.is_empty() {
            if !opts.partial_materialize {
                return Err(not_linear(&boundaries[0]));
            }
            tracing::debug!(count = boundaries.len(), "materializing plan boundaries");
            let inner = opts.intermediate();
            let mut replacements = HashMap::new();
            for b in &boundaries {
                let table = self.materialize(b, &inner)?;
                replacements.insert(b.id(), table_source(&table));
            }
            plan = replace_nodes(&plan, &replacements);
        }

        // Boundary tables are owned by `plan` and removed when it drops.
        self.run_linear(&plan, opts)
    }

    /// Appends run as a table-level concatenation: both sides are
    /// materialized and their segments chained without copying.
    pub(crate) fn materialize_append(&self, node: &NodeRef, opts: &MaterializeOptions) -> Result<Table> {
        let inner = opts.intermediate();
        let first = self.materialize(node.input(0)?, &inner)?;
        let second = self.materialize(node.input(1)?, &inner)?;
        let second = Table::from_columns(&self.store, first.column_names(), second.columns().to_vec())?;
        Ok(first.append(&second)?)
    }

    /// Apply output overrides to an already materialized table.
    pub(crate) fn finish_table(&self, table: Table, opts: &MaterializeOptions) -> Result<Table> {
        if !opts.has_output_overrides() {
            return Ok(table);
        }
        self.run_linear(&table_source(&table), opts)
    }

    /// Run a linear graph, one pipeline per output segment.
    pub(crate) fn run_linear(&self, plan: &NodeRef, opts: &MaterializeOptions) -> Result<Table> {
        let rows = check_source_lengths(plan)?;
        let num_segments = self.cfg.resolve_num_segments(opts.num_segments);
        let names = self.output_names(plan, opts)?;
        let types = output_types(plan)?;

        let segments = (0..num_segments)
            .map(|i| segment_graph(plan, i, num_segments, &mut Memo::new()))
            .collect::<std::result::Result<Vec<_>, PlanError>>()?;
        tracing::debug!(segments = num_segments, source_rows = rows, "running linear plan");

        let block_size = self.cfg.block_size;
        if let Some(cb) = &opts.write_callback {
            let stats = scheduler::run_all(&self.pool, segments, |i, seg| {
                let _span = tracing::debug_span!("segment", segment = i).entered();
                let mut out = CallbackOutput {
                    callback: cb,
                    segment: i,
                };
                SegmentPipeline::build(&seg, i, block_size)?.run(&mut out)
            })?;
            log_stats(&stats);
            return Ok(Table::empty(&self.store, names, types)?);
        }

        let temporary = opts.output_index_file.is_none();
        let path = opts
            .output_index_file
            .clone()
            .unwrap_or_else(|| self.temp_index_path());
        let mut writer = TableWriter::open_for_write(&self.store, path, names, types, num_segments)?;
        let outputs = match writer.outputs() {
            Ok(o) => o,
            Err(e) => {
                writer.abort();
                return Err(e.into());
            }
        };
        let work: Vec<_> = segments.into_iter().zip(outputs).collect();
        let result = scheduler::run_all(&self.pool, work, |i, (seg, mut out)| {
            let _span = tracing::debug_span!("segment", segment = i).entered();
            let stats = SegmentPipeline::build(&seg, i, block_size)?.run(&mut out)?;
            out.finish()?;
            Ok(stats)
        });
        match result {
            Ok(stats) => {
                log_stats(&stats);
                let table = writer.close()?;
                Ok(if temporary { table.into_temporary() } else { table })
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    fn output_names(&self, plan: &NodeRef, opts: &MaterializeOptions) -> Result<Vec<String>> {
        let names = match &opts.output_column_names {
            Some(names) => {
                let width = num_columns(plan)?;
                if names.len() != width {
                    return Err(ExecError::Invalid(format!(
                        "{} output column names for {width} columns",
                        names.len()
                    )));
                }
                names.clone()
            }
            None => column_names(plan)?,
        };
        Ok(dedup_names(&names))
    }
}

fn not_linear(node: &NodeRef) -> ExecError {
    ExecError::Plan(PlanError::NotLinear(format!(
        "{} {} needs partial materialization",
        node.kind(),
        node.id()
    )))
}

fn log_stats(stats: &[SegmentStats]) {
    let rows: u64 = stats.iter().map(|s| s.rows_out).sum();
    let steps: u64 = stats.iter().map(|s| s.steps).sum();
    let stopped = stats.iter().filter(|s| s.stopped_early).count();
    tracing::debug!(segments = stats.len(), rows, steps, stopped, "segments finished");
}

struct CallbackOutput<'c> {
    callback: &'c WriteCallback,
    segment: usize,
}

impl BlockOutput for CallbackOutput<'_> {
    fn write(&mut self, block: &RowBatch) -> strata_operators::Result<bool> {
        Ok((self.callback)(self.segment, block))
    }
}
