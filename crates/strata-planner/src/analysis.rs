//! Static shape analysis of operator graphs.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use strata_core::id::NodeId;
use strata_core::schema::DataType;
use strata_core::types::Scalar;

use crate::error::{PlanError, Result};
use crate::node::{
    NodePayload, NodeRef, OperatorKind, ParamValue, PlannerNode, AUX_LENGTH, AUX_NUM_COLUMNS,
    NAME, VALUE,
};

/// Output row count, when it is known without running the graph. `None` as
/// soon as a filter is involved. Memoized in each node's aux map.
pub fn infer_length(node: &PlannerNode) -> Result<Option<u64>> {
    if let Some(ParamValue::UInt(n)) = node.get_aux(AUX_LENGTH) {
        return Ok(Some(n));
    }
    let len = match node.kind() {
        OperatorKind::TableSource | OperatorKind::Range | OperatorKind::Constant => {
            let (b, e) = node.source_range()?;
            Some(e - b)
        }
        OperatorKind::Project | OperatorKind::Transform => infer_length(node.input(0)?)?,
        OperatorKind::Union | OperatorKind::BinaryTransform => {
            let mut len = None;
            for input in node.inputs() {
                match (len, infer_length(input)?) {
                    (_, None) => return Ok(None),
                    (None, Some(l)) => len = Some(l),
                    (Some(a), Some(b)) if a != b => {
                        return Err(PlanError::LengthMismatch(format!(
                            "{} {} has inputs of {a} and {b} rows",
                            node.kind(),
                            node.id()
                        )))
                    }
                    _ => {}
                }
            }
            len
        }
        OperatorKind::Append => {
            match (infer_length(node.input(0)?)?, infer_length(node.input(1)?)?) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            }
        }
        OperatorKind::LogicalFilter => None,
    };
    if let Some(n) = len {
        node.set_aux(AUX_LENGTH, ParamValue::UInt(n));
    }
    Ok(len)
}

pub fn num_columns(node: &PlannerNode) -> Result<usize> {
    if let Some(ParamValue::UInt(n)) = node.get_aux(AUX_NUM_COLUMNS) {
        return Ok(n as usize);
    }
    let n = match node.kind() {
        OperatorKind::TableSource => node.table()?.num_columns(),
        OperatorKind::Range
        | OperatorKind::Constant
        | OperatorKind::Transform
        | OperatorKind::BinaryTransform => 1,
        OperatorKind::Project => node.indices()?.len(),
        OperatorKind::Union => {
            let mut n = 0;
            for input in node.inputs() {
                n += num_columns(input)?;
            }
            n
        }
        OperatorKind::Append | OperatorKind::LogicalFilter => num_columns(node.input(0)?)?,
    };
    node.set_aux(AUX_NUM_COLUMNS, ParamValue::UInt(n as u64));
    Ok(n)
}

pub fn output_types(node: &PlannerNode) -> Result<Vec<DataType>> {
    Ok(match node.kind() {
        OperatorKind::TableSource => node.table()?.column_types(),
        OperatorKind::Range => vec![DataType::Int64],
        OperatorKind::Constant => match node.param(VALUE) {
            Some(ParamValue::Scalar(v)) => vec![v.data_type()],
            _ => vec![DataType::Undefined],
        },
        OperatorKind::Transform => match node.payload() {
            NodePayload::Transform { output_type, .. } => vec![*output_type],
            _ => vec![DataType::Undefined],
        },
        OperatorKind::Project => {
            let types = output_types(node.input(0)?)?;
            select(node, &types)?
        }
        OperatorKind::Union => {
            let mut types = Vec::new();
            for input in node.inputs() {
                types.extend(output_types(input)?);
            }
            types
        }
        OperatorKind::Append => {
            let a = output_types(node.input(0)?)?;
            let b = output_types(node.input(1)?)?;
            a.iter().zip(&b).map(|(x, y)| x.unify(y)).collect()
        }
        OperatorKind::LogicalFilter => output_types(node.input(0)?)?,
        OperatorKind::BinaryTransform => {
            let left = output_types(node.input(0)?)?;
            let right = output_types(node.input(1)?)?;
            match (left.first(), right.first()) {
                (Some(&l), Some(&r)) => vec![node
                    .binary_op()?
                    .output_type(l, r)
                    .map_err(|e| PlanError::InvalidPlan(e.to_string()))?],
                _ => vec![DataType::Undefined],
            }
        }
    })
}

/// Column names before de-duplication.
pub fn column_names(node: &PlannerNode) -> Result<Vec<String>> {
    Ok(match node.kind() {
        OperatorKind::TableSource => node.table()?.column_names(),
        OperatorKind::Range => vec!["index".to_string()],
        OperatorKind::Constant => vec!["constant".to_string()],
        OperatorKind::Transform | OperatorKind::BinaryTransform => match node.param(NAME) {
            Some(ParamValue::Str(s)) => vec![s.clone()],
            _ => vec![node.kind().name().to_string()],
        },
        OperatorKind::Project => {
            let names = column_names(node.input(0)?)?;
            select(node, &names)?
        }
        OperatorKind::Union => {
            let mut names = Vec::new();
            for input in node.inputs() {
                names.extend(column_names(input)?);
            }
            names
        }
        OperatorKind::Append | OperatorKind::LogicalFilter => column_names(node.input(0)?)?,
    })
}

fn select<T: Clone>(node: &PlannerNode, of: &[T]) -> Result<Vec<T>> {
    node.indices()?
        .iter()
        .map(|&i| {
            of.get(i).cloned().ok_or_else(|| {
                PlanError::InvalidPlan(format!(
                    "project {} index {i} out of range for {} columns",
                    node.id(),
                    of.len()
                ))
            })
        })
        .collect()
}

/// Distinct nodes reachable from `root`.
pub fn graph_size(root: &NodeRef) -> usize {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(n) = stack.pop() {
        if seen.insert(n.id()) {
            stack.extend(n.inputs());
        }
    }
    seen.len()
}

/// Nodes on the longest root-to-source path.
pub fn graph_depth(root: &NodeRef) -> usize {
    fn depth(n: &NodeRef, memo: &mut HashMap<NodeId, usize>) -> usize {
        if let Some(&d) = memo.get(&n.id()) {
            return d;
        }
        let d = 1 + n.inputs().iter().map(|i| depth(i, memo)).max().unwrap_or(0);
        memo.insert(n.id(), d);
        d
    }
    depth(root, &mut HashMap::new())
}

/// Every source node reachable from `root`, each once.
pub fn sources(root: &NodeRef) -> Vec<NodeRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(n) = stack.pop() {
        if !seen.insert(n.id()) {
            continue;
        }
        if n.kind().is_source() {
            out.push(n.clone());
        }
        stack.extend(n.inputs());
    }
    out
}

/// Whether `node` is a logical filter whose mask is a constant that selects
/// no row, so the rows of its data input are never looked at.
pub fn selects_nothing(node: &PlannerNode) -> bool {
    if node.kind() != OperatorKind::LogicalFilter {
        return false;
    }
    let Some(mask) = node.inputs().get(1) else {
        return false;
    };
    mask.kind() == OperatorKind::Constant
        && !matches!(mask.param(VALUE), Some(ParamValue::Scalar(v)) if v.is_truthy())
}

/// Whether a lazy graph has grown large enough that the caller should
/// materialize it before chaining further.
pub fn online_materialization_recommended(root: &NodeRef, max_nodes: usize, max_depth: usize) -> bool {
    let size = graph_size(root);
    let depth = graph_depth(root);
    let recommend = size > max_nodes || depth > max_depth;
    if recommend {
        tracing::debug!(size, depth, "online materialization recommended");
    }
    recommend
}

/// Indented one-line-per-node rendering. Shared nodes are printed once and
/// referenced by id afterwards.
pub fn explain(root: &NodeRef) -> String {
    fn walk(n: &NodeRef, level: usize, seen: &mut HashSet<NodeId>, out: &mut String) {
        let pad = "  ".repeat(level);
        if !seen.insert(n.id()) {
            let _ = writeln!(out, "{pad}^{}", n.id().get());
            return;
        }
        let _ = write!(out, "{pad}{} #{}", n.kind(), n.id().get());
        for (k, v) in n.params() {
            let shown = match v {
                ParamValue::Scalar(Scalar::Str(s)) => format!("{s:?}"),
                ParamValue::Scalar(s) => s.to_string(),
                ParamValue::Indices(ix) => format!("{ix:?}"),
                ParamValue::Int(i) => i.to_string(),
                ParamValue::UInt(u) => u.to_string(),
                ParamValue::Str(s) => s.clone(),
                ParamValue::Bool(b) => b.to_string(),
            };
            let _ = write!(out, " {k}={shown}");
        }
        out.push('\n');
        for i in n.inputs() {
            walk(i, level + 1, seen, out);
        }
    }
    let mut out = String::new();
    walk(root, 0, &mut HashSet::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{append, constant, logical_filter, project, range, union};
    use std::sync::Arc;

    #[test]
    fn lengths_and_shapes() {
        let r = range(0, 10).unwrap();
        let c = constant(Scalar::F64(1.0), 10);
        let u = union(vec![Arc::clone(&r), Arc::clone(&c), Arc::clone(&r)]).unwrap();
        assert_eq!(infer_length(&u).unwrap(), Some(10));
        assert_eq!(num_columns(&u).unwrap(), 3);
        assert_eq!(
            output_types(&u).unwrap(),
            vec![DataType::Int64, DataType::Float64, DataType::Int64]
        );
        let p = project(&u, vec![2, 1]).unwrap();
        assert_eq!(column_names(&p).unwrap(), vec!["index", "constant"]);

        let a = append(&r, &range(0, 5).unwrap()).unwrap();
        assert_eq!(infer_length(&a).unwrap(), Some(15));
        let f = logical_filter(&r, &r).unwrap();
        assert_eq!(infer_length(&f).unwrap(), None);

        let bad = union(vec![Arc::clone(&r), range(0, 3).unwrap()]).unwrap();
        assert!(matches!(infer_length(&bad), Err(PlanError::LengthMismatch(_))));
    }

    #[test]
    fn size_and_depth_count_shared_nodes_once() {
        let r = range(0, 10).unwrap();
        let p = project(&r, vec![0]).unwrap();
        let u = union(vec![Arc::clone(&p), Arc::clone(&p), Arc::clone(&r)]).unwrap();
        assert_eq!(graph_size(&u), 3);
        assert_eq!(graph_depth(&u), 3);
        assert!(online_materialization_recommended(&u, 2, 10));
        assert!(!online_materialization_recommended(&u, 10, 10));
        assert!(explain(&u).contains('^'));
    }

    #[test]
    fn constant_masks_that_select_nothing() {
        let r = range(0, 10).unwrap();
        let none = logical_filter(&r, &constant(Scalar::I64(0), 10)).unwrap();
        let all = logical_filter(&r, &constant(Scalar::Bool(true), 10)).unwrap();
        let dynamic = logical_filter(&r, &r).unwrap();
        assert!(selects_nothing(&none));
        assert!(selects_nothing(&logical_filter(&r, &constant(Scalar::Null, 10)).unwrap()));
        assert!(!selects_nothing(&all));
        assert!(!selects_nothing(&dynamic));
        assert!(!selects_nothing(&r));
    }
}
