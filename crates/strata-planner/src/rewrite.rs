//! Memoized graph rewrites: segmenting a graph for parallel execution and
//! slicing it to a row range.
//!
//! Both rewrites copy the graph once per distinct node, keyed by `NodeId`, so
//! a sub-plan shared by several consumers is still shared in the copy.

use std::collections::HashMap;
use std::sync::Arc;

use strata_core::id::NodeId;

use crate::error::{PlanError, Result};
use crate::node::{NodeRef, OperatorKind};

pub type Memo = HashMap<NodeId, NodeRef>;

/// Sub-range of `[begin, end)` covered by segment `segment_idx` of
/// `num_segments`. Consecutive segments tile the range exactly.
pub fn segment_range(begin: u64, end: u64, segment_idx: usize, num_segments: usize) -> (u64, u64) {
    let len = end.saturating_sub(begin) as u128;
    let n = num_segments as u128;
    let i = segment_idx as u128;
    let lo = begin + ((i * len) / n) as u64;
    let hi = begin + (((i + 1) * len) / n) as u64;
    (lo, hi)
}

/// Copy of `node` restricted to segment `segment_idx` of `num_segments`.
/// With `num_segments == 0` the node is returned unchanged.
pub fn segment_graph(node: &NodeRef, segment_idx: usize, num_segments: usize, memo: &mut Memo) -> Result<NodeRef> {
    if num_segments == 0 {
        return Ok(Arc::clone(node));
    }
    if segment_idx >= num_segments {
        return Err(PlanError::OutOfBounds(format!(
            "segment {segment_idx} of {num_segments}"
        )));
    }
    if let Some(done) = memo.get(&node.id()) {
        return Ok(Arc::clone(done));
    }
    let out = if node.kind().is_source() {
        let (b, e) = node.source_range()?;
        let (lo, hi) = segment_range(b, e, segment_idx, num_segments);
        node.with_range(lo, hi)
    } else if node.kind() == OperatorKind::Append {
        return Err(PlanError::InvalidPlan(format!(
            "append {} cannot be segmented; materialize it first",
            node.id()
        )));
    } else {
        let inputs = node
            .inputs()
            .iter()
            .map(|i| segment_graph(i, segment_idx, num_segments, memo))
            .collect::<Result<Vec<_>>>()?;
        node.with_inputs(inputs)
    };
    memo.insert(node.id(), Arc::clone(&out));
    Ok(out)
}

/// Whether `slice_graph` can handle every node under `node`.
pub fn is_sliceable(node: &NodeRef) -> bool {
    fn walk(n: &NodeRef, seen: &mut HashMap<NodeId, bool>) -> bool {
        if let Some(&ok) = seen.get(&n.id()) {
            return ok;
        }
        let ok = !matches!(n.kind(), OperatorKind::LogicalFilter | OperatorKind::Append)
            && n.inputs().iter().all(|i| walk(i, seen));
        seen.insert(n.id(), ok);
        ok
    }
    walk(node, &mut HashMap::new())
}

/// Copy of `node` producing only its rows `[begin, end)`. Slices compose:
/// slicing a slice offsets into the already sliced range.
pub fn slice_graph(node: &NodeRef, begin: u64, end: u64, memo: &mut Memo) -> Result<NodeRef> {
    if begin > end {
        return Err(PlanError::OutOfBounds(format!("slice [{begin}, {end}) is reversed")));
    }
    if let Some(done) = memo.get(&node.id()) {
        return Ok(Arc::clone(done));
    }
    let out = match node.kind() {
        OperatorKind::LogicalFilter | OperatorKind::Append => {
            return Err(PlanError::InvalidPlan(format!(
                "{} {} cannot be sliced without materializing",
                node.kind(),
                node.id()
            )))
        }
        k if k.is_source() => {
            let (old_begin, old_end) = node.source_range()?;
            let out_of_bounds = || {
                PlanError::OutOfBounds(format!(
                    "slice [{begin}, {end}) of {} {} with {} rows",
                    node.kind(),
                    node.id(),
                    old_end - old_begin
                ))
            };
            let new_begin = old_begin.checked_add(begin).ok_or_else(out_of_bounds)?;
            let new_end = new_begin.checked_add(end - begin).ok_or_else(out_of_bounds)?;
            if new_end > old_end {
                return Err(out_of_bounds());
            }
            node.with_range(new_begin, new_end)
        }
        _ => {
            let inputs = node
                .inputs()
                .iter()
                .map(|i| slice_graph(i, begin, end, memo))
                .collect::<Result<Vec<_>>>()?;
            node.with_inputs(inputs)
        }
    };
    memo.insert(node.id(), Arc::clone(&out));
    Ok(out)
}

/// Copy of `root` with the nodes keyed in `replacements` swapped out.
/// Untouched sub-graphs are reused as they are.
pub fn replace_nodes(root: &NodeRef, replacements: &HashMap<NodeId, NodeRef>) -> NodeRef {
    fn walk(n: &NodeRef, repl: &HashMap<NodeId, NodeRef>, memo: &mut Memo) -> NodeRef {
        if let Some(r) = repl.get(&n.id()).or_else(|| memo.get(&n.id())) {
            return Arc::clone(r);
        }
        let inputs: Vec<NodeRef> = n.inputs().iter().map(|i| walk(i, repl, memo)).collect();
        let out = if inputs.iter().zip(n.inputs()).all(|(a, b)| Arc::ptr_eq(a, b)) {
            Arc::clone(n)
        } else {
            n.with_inputs(inputs)
        };
        memo.insert(n.id(), Arc::clone(&out));
        out
    }
    walk(root, replacements, &mut Memo::new())
}
