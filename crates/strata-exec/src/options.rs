//! Per-call materialization options.

use std::path::PathBuf;
use std::sync::Arc;

use strata_core::types::RowBatch;

/// Receives each output block with its segment index. Returning `true` stops
/// that segment early.
pub type WriteCallback = Arc<dyn Fn(usize, &RowBatch) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct MaterializeOptions {
    /// Output segments; `0` uses the configured default.
    pub num_segments: usize,
    /// Stream results here instead of writing a table.
    pub write_callback: Option<WriteCallback>,
    pub disable_optimization: bool,
    pub only_first_pass_optimizations: bool,
    /// Materialize node by node, without optimization or segment fusion.
    pub naive_mode: bool,
    /// Materialize non-linear sub-graphs first instead of failing.
    pub partial_materialize: bool,
    /// Where to write the result's index. A generated path in the temp
    /// directory otherwise.
    pub output_index_file: Option<PathBuf>,
    pub output_column_names: Option<Vec<String>>,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            num_segments: 0,
            write_callback: None,
            disable_optimization: false,
            only_first_pass_optimizations: false,
            naive_mode: false,
            partial_materialize: true,
            output_index_file: None,
            output_column_names: None,
        }
    }
}

impl MaterializeOptions {
    /// Options for a table that only feeds a larger materialization: same
    /// segmenting, no output overrides, and no second round of optimization.
    pub(crate) fn intermediate(&self) -> Self {
        Self {
            num_segments: self.num_segments,
            disable_optimization: true,
            ..Self::default()
        }
    }

    /// Whether the caller wants anything besides a table in the temp dir.
    pub(crate) fn has_output_overrides(&self) -> bool {
        self.write_callback.is_some()
            || self.output_index_file.is_some()
            || self.output_column_names.is_some()
    }
}

impl std::fmt::Debug for MaterializeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializeOptions")
            .field("num_segments", &self.num_segments)
            .field("write_callback", &self.write_callback.is_some())
            .field("disable_optimization", &self.disable_optimization)
            .field("only_first_pass_optimizations", &self.only_first_pass_optimizations)
            .field("naive_mode", &self.naive_mode)
            .field("partial_materialize", &self.partial_materialize)
            .field("output_index_file", &self.output_index_file)
            .field("output_column_names", &self.output_column_names)
            .finish()
    }
}
