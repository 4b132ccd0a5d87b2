//! Naive materialization: every node is written to its own table before its
//! consumers run, with no optimization and a single segment per node. Slow,
//! and only used to cross-check the planned path.

use std::collections::HashMap;
use std::sync::Arc;

use strata_core::id::NodeId;
use strata_planner::{table_source, NodeRef, OperatorKind};
use strata_storage::Table;

use crate::engine::Engine;
use crate::error::Result;
use crate::options::MaterializeOptions;

pub(crate) fn materialize(engine: &Engine, root: &NodeRef, opts: &MaterializeOptions) -> Result<Table> {
    let mut done = HashMap::new();
    if root.kind() == OperatorKind::Append {
        let table = node_table(engine, root, &mut done)?;
        return engine.finish_table(table, opts);
    }
    let node = with_table_inputs(engine, root, &mut done)?;
    engine.run_linear(&node, opts)
}

fn single_segment() -> MaterializeOptions {
    MaterializeOptions {
        num_segments: 1,
        disable_optimization: true,
        ..MaterializeOptions::default()
    }
}

/// `node` with every input replaced by a scan of that input's table.
fn with_table_inputs(engine: &Engine, node: &NodeRef, done: &mut HashMap<NodeId, Table>) -> Result<NodeRef> {
    if node.inputs().is_empty() {
        return Ok(Arc::clone(node));
    }
    let mut inputs = Vec::with_capacity(node.inputs().len());
    for input in node.inputs() {
        let table = node_table(engine, input, done)?;
        inputs.push(table_source(&table));
    }
    Ok(node.with_inputs(inputs))
}

fn node_table(engine: &Engine, node: &NodeRef, done: &mut HashMap<NodeId, Table>) -> Result<Table> {
    if let Some(t) = done.get(&node.id()) {
        return Ok(t.clone());
    }
    let table = if node.kind() == OperatorKind::Append {
        let first = node_table(engine, node.input(0)?, done)?;
        let second = node_table(engine, node.input(1)?, done)?;
        let second = Table::from_columns(engine.store(), first.column_names(), second.columns().to_vec())?;
        first.append(&second)?
    } else {
        let single = with_table_inputs(engine, node, done)?;
        engine.run_linear(&single, &single_segment())?
    };
    tracing::trace!(node = %node.id(), kind = %node.kind(), rows = table.num_rows(), "naive node materialized");
    done.insert(node.id(), table.clone());
    Ok(table)
}
