//! Which parts of a graph can run as one segmented pipeline.
//!
//! Every node produces rows at some rate relative to the graph's sources.
//! Sources, projections and transforms keep their input's rate; a logical
//! filter starts a new rate of its own. Nodes that combine inputs row by row
//! (unions, binary transforms, and a filter's data and mask) need all inputs
//! at the same rate.
//! Where they are not, the inputs off the base rate are materialization
//! boundaries: they are written to tables first and scanned back, which puts
//! them at the base rate. Appends are boundaries wherever they occur.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use strata_core::id::NodeId;

use crate::analysis::{infer_length, sources};
use crate::error::{PlanError, Result};
use crate::node::{NodeRef, OperatorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rate {
    /// One output row per source row.
    Base,
    /// One output row per row kept by this filter.
    Filtered(NodeId),
}

/// Rate of `node` once the boundaries below it have been materialized.
pub fn rate(node: &NodeRef) -> Rate {
    rate_memo(node, &mut HashMap::new())
}

fn rate_memo(node: &NodeRef, memo: &mut HashMap<NodeId, Rate>) -> Rate {
    if let Some(&r) = memo.get(&node.id()) {
        return r;
    }
    let r = match node.kind() {
        OperatorKind::TableSource
        | OperatorKind::Range
        | OperatorKind::Constant
        | OperatorKind::Append => Rate::Base,
        OperatorKind::LogicalFilter => Rate::Filtered(node.id()),
        OperatorKind::Project | OperatorKind::Transform => match node.inputs().first() {
            Some(i) => rate_memo(i, memo),
            None => Rate::Base,
        },
        OperatorKind::Union | OperatorKind::BinaryTransform => {
            let rates: Vec<Rate> = node.inputs().iter().map(|i| rate_memo(i, memo)).collect();
            match rates.split_first() {
                Some((first, rest)) if rest.iter().all(|r| r == first) => *first,
                _ => Rate::Base,
            }
        }
    };
    memo.insert(node.id(), r);
    r
}

/// Nodes that must be materialized before `root` can be segmented, each
/// once, in discovery order. The walk does not descend below a boundary;
/// materializing the boundary deals with what is under it.
pub fn materialization_boundaries(root: &NodeRef) -> Vec<NodeRef> {
    let mut rates = HashMap::new();
    let mut visited = HashSet::new();
    let mut chosen = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![Arc::clone(root)];

    while let Some(n) = stack.pop() {
        if !visited.insert(n.id()) {
            continue;
        }
        match n.kind() {
            OperatorKind::Append => {
                if chosen.insert(n.id()) {
                    out.push(n);
                }
            }
            OperatorKind::Union | OperatorKind::BinaryTransform | OperatorKind::LogicalFilter => {
                let input_rates: Vec<Rate> = n.inputs().iter().map(|i| rate_memo(i, &mut rates)).collect();
                let aligned = input_rates.windows(2).all(|w| w[0] == w[1]);
                for (input, r) in n.inputs().iter().zip(input_rates) {
                    if aligned || r == Rate::Base {
                        stack.push(Arc::clone(input));
                    } else if chosen.insert(input.id()) {
                        visited.insert(input.id());
                        out.push(Arc::clone(input));
                    }
                }
            }
            _ => stack.extend(n.inputs().iter().cloned()),
        }
    }
    if !out.is_empty() {
        tracing::debug!(count = out.len(), "materialization boundaries found");
    }
    out
}

/// Whether `root` runs as one segmented pass as it stands.
pub fn is_linear(root: &NodeRef) -> bool {
    materialization_boundaries(root).is_empty()
}

/// All sources of a segmentable graph must cover the same number of rows,
/// otherwise their segments would not line up.
pub fn check_source_lengths(root: &NodeRef) -> Result<u64> {
    let mut len = None;
    for src in sources(root) {
        let n = infer_length(&src)?.unwrap_or(0);
        match len {
            None => len = Some(n),
            Some(l) if l != n => {
                return Err(PlanError::LengthMismatch(format!(
                    "sources of {l} and {n} rows under {} {}",
                    root.kind(),
                    root.id()
                )))
            }
            Some(_) => {}
        }
    }
    Ok(len.unwrap_or(0))
}
