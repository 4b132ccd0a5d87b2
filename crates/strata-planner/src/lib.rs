#![forbid(unsafe_code)]
//! strata-planner: lazy operator graphs and the rewrites that prepare them
//! for execution.
//!
//! - `node`: `PlannerNode` DAGs and their builders
//! - `analysis`: static lengths, widths, types, names and graph size
//! - `rewrite`: memoized segmenting and slicing, node replacement
//! - `rules`: the two optimization passes
//! - `linearity`: rates and materialization boundaries
//!
//! Nothing here reads data; table sources only carry a `Table` handle.

pub mod analysis;
pub mod error;
pub mod linearity;
pub mod node;
pub mod rewrite;
pub mod rules;

pub use analysis::{
    column_names, explain, graph_depth, graph_size, infer_length, num_columns,
    online_materialization_recommended, output_types, selects_nothing, sources,
};
pub use error::{PlanError, Result};
pub use linearity::{check_source_lengths, is_linear, materialization_boundaries, rate, Rate};
pub use node::{
    append, binary_transform, constant, logical_filter, project, range, table_source,
    table_source_range, transform, union, NodePayload, NodeRef, OperatorAttributes, OperatorKind,
    ParamValue, Params, PlannerNode,
};
pub use rewrite::{is_sliceable, replace_nodes, segment_graph, segment_range, slice_graph, Memo};
pub use rules::optimize;
