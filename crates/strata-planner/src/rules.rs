//! Optimization passes over operator graphs.
//!
//! The first pass only reorders: projections move below appends and below
//! the data side of logical filters so fewer columns flow through them. The
//! second pass simplifies: identity projections vanish, consecutive
//! projections merge, projections over table scans become scans of the
//! selected columns, single-input unions collapse and appends with a side
//! known to be empty collapse to the other side.
//!
//! Each pass rewrites bottom-up with a memo keyed by node id and repeats until
//! nothing changes. A node whose inputs and shape are unchanged is returned as
//! is, so "did anything change" is a pointer comparison on the root.

use std::sync::Arc;

use crate::analysis::{column_names, infer_length, num_columns};
use crate::error::Result;
use crate::node::{self, NodeRef, OperatorKind};
use crate::rewrite::Memo;

const MAX_ITERATIONS: usize = 16;

type Rule = fn(&NodeRef) -> Result<Option<NodeRef>>;

const FIRST_PASS: &[Rule] = &[project_below_append, project_below_filter];

const SECOND_PASS: &[Rule] = &[
    drop_identity_project,
    merge_projects,
    fuse_project_into_table_source,
    collapse_single_union,
    collapse_empty_append,
];

pub fn first_pass(root: &NodeRef) -> Result<NodeRef> {
    to_fixpoint(root, FIRST_PASS, "first")
}

pub fn second_pass(root: &NodeRef) -> Result<NodeRef> {
    to_fixpoint(root, SECOND_PASS, "second")
}

/// Both passes, or only the reordering one.
pub fn optimize(root: &NodeRef, only_first_pass: bool) -> Result<NodeRef> {
    let out = first_pass(root)?;
    if only_first_pass {
        return Ok(out);
    }
    second_pass(&out)
}

fn to_fixpoint(root: &NodeRef, rules: &[Rule], pass: &str) -> Result<NodeRef> {
    let mut current = Arc::clone(root);
    for iteration in 0..MAX_ITERATIONS {
        let next = rewrite(&current, rules, &mut Memo::new())?;
        if Arc::ptr_eq(&next, &current) {
            tracing::debug!(pass, iterations = iteration, "optimization reached fixpoint");
            return Ok(current);
        }
        current = next;
    }
    tracing::debug!(pass, "optimization stopped at the iteration limit");
    Ok(current)
}

fn rewrite(node: &NodeRef, rules: &[Rule], memo: &mut Memo) -> Result<NodeRef> {
    if let Some(done) = memo.get(&node.id()) {
        return Ok(Arc::clone(done));
    }
    let inputs = node
        .inputs()
        .iter()
        .map(|i| rewrite(i, rules, memo))
        .collect::<Result<Vec<_>>>()?;
    let mut out = if inputs.iter().zip(node.inputs()).all(|(a, b)| Arc::ptr_eq(a, b)) {
        Arc::clone(node)
    } else {
        node.with_inputs(inputs)
    };
    for rule in rules {
        if let Some(replaced) = rule(&out)? {
            out = replaced;
            break;
        }
    }
    memo.insert(node.id(), Arc::clone(&out));
    Ok(out)
}

fn is_project(n: &NodeRef) -> bool {
    n.kind() == OperatorKind::Project
}

/// project(append(a, b)) -> append(project(a), project(b))
fn project_below_append(n: &NodeRef) -> Result<Option<NodeRef>> {
    if !is_project(n) {
        return Ok(None);
    }
    let input = n.input(0)?;
    if input.kind() != OperatorKind::Append {
        return Ok(None);
    }
    let ix = n.indices()?.to_vec();
    let a = node::project(input.input(0)?, ix.clone())?;
    let b = node::project(input.input(1)?, ix)?;
    Ok(Some(node::append(&a, &b)?))
}

/// project(filter(data, mask)) -> filter(project(data), mask)
fn project_below_filter(n: &NodeRef) -> Result<Option<NodeRef>> {
    if !is_project(n) {
        return Ok(None);
    }
    let input = n.input(0)?;
    if input.kind() != OperatorKind::LogicalFilter {
        return Ok(None);
    }
    let data = node::project(input.input(0)?, n.indices()?.to_vec())?;
    Ok(Some(node::logical_filter(&data, input.input(1)?)?))
}

fn drop_identity_project(n: &NodeRef) -> Result<Option<NodeRef>> {
    if !is_project(n) {
        return Ok(None);
    }
    let input = n.input(0)?;
    let ix = n.indices()?;
    let identity = ix.len() == num_columns(input)? && ix.iter().enumerate().all(|(i, &j)| i == j);
    Ok(identity.then(|| Arc::clone(input)))
}

/// project(project(x, i1), i2) -> project(x, i1[i2])
fn merge_projects(n: &NodeRef) -> Result<Option<NodeRef>> {
    if !is_project(n) {
        return Ok(None);
    }
    let inner = n.input(0)?;
    if !is_project(inner) {
        return Ok(None);
    }
    let (outer_ix, inner_ix) = (n.indices()?, inner.indices()?);
    let merged = outer_ix.iter().map(|&i| inner_ix[i]).collect();
    Ok(Some(node::project(inner.input(0)?, merged)?))
}

/// project(table_source(t)) -> table_source(t.select_columns(..))
fn fuse_project_into_table_source(n: &NodeRef) -> Result<Option<NodeRef>> {
    if !is_project(n) {
        return Ok(None);
    }
    let src = n.input(0)?;
    if src.kind() != OperatorKind::TableSource {
        return Ok(None);
    }
    let (begin, end) = src.source_range()?;
    let narrowed = src.table()?.select_columns(n.indices()?)?;
    Ok(Some(node::table_source_range(&narrowed, begin, end)?))
}

fn collapse_single_union(n: &NodeRef) -> Result<Option<NodeRef>> {
    if n.kind() == OperatorKind::Union && n.inputs().len() == 1 {
        return Ok(Some(Arc::clone(n.input(0)?)));
    }
    Ok(None)
}

/// append(a, empty) -> a, append(empty, b) -> b. Only when the surviving side
/// has the same column names, since the append takes its names from `a`.
fn collapse_empty_append(n: &NodeRef) -> Result<Option<NodeRef>> {
    if n.kind() != OperatorKind::Append {
        return Ok(None);
    }
    let (a, b) = (n.input(0)?, n.input(1)?);
    if infer_length(b)? == Some(0) {
        return Ok(Some(Arc::clone(a)));
    }
    if infer_length(a)? == Some(0) && column_names(a)? == column_names(b)? {
        return Ok(Some(Arc::clone(b)));
    }
    Ok(None)
}
