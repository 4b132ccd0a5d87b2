//! Operator graph nodes.
//!
//! A graph is a DAG of immutable `PlannerNode`s shared through `Arc`. Every
//! node gets a fresh `NodeId`; rewrites key their memo maps by it so shared
//! sub-plans stay shared. The only mutable part of a node is its auxiliary
//! map, which analyses use to memoize results (e.g. the output length).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use strata_core::id::NodeId;
use strata_core::ops::BinaryOp;
use strata_core::schema::DataType;
use strata_core::types::{RowFn, Scalar};
use strata_storage::Table;

use crate::analysis;
use crate::error::{PlanError, Result};

pub const BEGIN_INDEX: &str = "begin_index";
pub const END_INDEX: &str = "end_index";
pub const INDICES: &str = "indices";
pub const VALUE: &str = "value";
pub const NAME: &str = "name";
pub const OP: &str = "op";

pub(crate) const AUX_LENGTH: &str = "length";
pub(crate) const AUX_NUM_COLUMNS: &str = "num_columns";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperatorKind {
    TableSource,
    Range,
    Constant,
    Project,
    Union,
    Append,
    LogicalFilter,
    Transform,
    BinaryTransform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAttributes {
    pub is_source: bool,
    /// Output rows advance in lockstep with input rows (or, for sources, with
    /// the row range), so the node can be cut into segments.
    pub is_linear: bool,
    /// `None` for variadic operators.
    pub num_inputs: Option<usize>,
}

impl OperatorKind {
    pub fn attributes(&self) -> OperatorAttributes {
        use OperatorKind::*;
        let (is_source, is_linear, num_inputs) = match self {
            TableSource | Range | Constant => (true, true, Some(0)),
            Project | Transform => (false, true, Some(1)),
            Union => (false, true, None),
            Append => (false, false, Some(2)),
            LogicalFilter | BinaryTransform => (false, true, Some(2)),
        };
        OperatorAttributes {
            is_source,
            is_linear,
            num_inputs,
        }
    }

    pub fn is_source(&self) -> bool {
        self.attributes().is_source
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::TableSource => "table_source",
            OperatorKind::Range => "range",
            OperatorKind::Constant => "constant",
            OperatorKind::Project => "project",
            OperatorKind::Union => "union",
            OperatorKind::Append => "append",
            OperatorKind::LogicalFilter => "logical_filter",
            OperatorKind::Transform => "transform",
            OperatorKind::BinaryTransform => "binary_transform",
        }
    }
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    UInt(u64),
    Str(String),
    Bool(bool),
    Indices(Vec<usize>),
    Scalar(Scalar),
}

pub type Params = BTreeMap<String, ParamValue>;

#[derive(Clone, Default)]
pub enum NodePayload {
    #[default]
    None,
    Table(Table),
    Transform {
        f: RowFn,
        output_type: DataType,
    },
}

impl std::fmt::Debug for NodePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodePayload::None => f.write_str("None"),
            NodePayload::Table(t) => f.debug_tuple("Table").field(t).finish(),
            NodePayload::Transform { output_type, .. } => {
                write!(f, "Transform(-> {output_type})")
            }
        }
    }
}

pub type NodeRef = Arc<PlannerNode>;

pub struct PlannerNode {
    id: NodeId,
    kind: OperatorKind,
    params: Params,
    payload: NodePayload,
    inputs: Vec<NodeRef>,
    aux: Mutex<Params>,
}

impl PlannerNode {
    fn build(kind: OperatorKind, params: Params, payload: NodePayload, inputs: Vec<NodeRef>) -> NodeRef {
        Arc::new(PlannerNode {
            id: NodeId::fresh(),
            kind,
            params,
            payload,
            inputs,
            aux: Mutex::new(Params::new()),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    pub fn inputs(&self) -> &[NodeRef] {
        &self.inputs
    }

    pub fn input(&self, i: usize) -> Result<&NodeRef> {
        self.inputs.get(i).ok_or_else(|| {
            PlanError::InvalidPlan(format!("{} node {} has no input {i}", self.kind, self.id))
        })
    }

    // The aux map is a memo cache; a poisoned lock still holds valid entries.
    pub fn get_aux(&self, key: &str) -> Option<ParamValue> {
        self.aux
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_aux(&self, key: &str, value: ParamValue) {
        self.aux
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn uint_param(&self, key: &str) -> Result<u64> {
        match self.params.get(key) {
            Some(ParamValue::UInt(v)) => Ok(*v),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(*v as u64),
            other => Err(PlanError::InvalidPlan(format!(
                "{} node {}: parameter '{key}' must be a non-negative integer, got {other:?}",
                self.kind, self.id
            ))),
        }
    }

    pub fn begin_index(&self) -> Result<u64> {
        self.uint_param(BEGIN_INDEX)
    }

    pub fn end_index(&self) -> Result<u64> {
        self.uint_param(END_INDEX)
    }

    /// `[begin_index, end_index)` of a source node.
    pub fn source_range(&self) -> Result<(u64, u64)> {
        let (b, e) = (self.begin_index()?, self.end_index()?);
        if b > e {
            return Err(PlanError::InvalidPlan(format!(
                "{} node {}: range [{b}, {e}) is reversed",
                self.kind, self.id
            )));
        }
        Ok((b, e))
    }

    pub fn indices(&self) -> Result<&[usize]> {
        match self.params.get(INDICES) {
            Some(ParamValue::Indices(v)) => Ok(v),
            other => Err(PlanError::InvalidPlan(format!(
                "{} node {}: expected 'indices', got {other:?}",
                self.kind, self.id
            ))),
        }
    }

    pub fn binary_op(&self) -> Result<BinaryOp> {
        match self.params.get(OP) {
            Some(ParamValue::Str(s)) => BinaryOp::from_symbol(s).map_err(|e| {
                PlanError::InvalidPlan(format!("{} node {}: {e}", self.kind, self.id))
            }),
            other => Err(PlanError::InvalidPlan(format!(
                "{} node {}: expected 'op', got {other:?}",
                self.kind, self.id
            ))),
        }
    }

    pub fn table(&self) -> Result<&Table> {
        match &self.payload {
            NodePayload::Table(t) => Ok(t),
            _ => Err(PlanError::InvalidPlan(format!(
                "{} node {} has no table payload",
                self.kind, self.id
            ))),
        }
    }

    /// Copy with different inputs and a fresh id. The aux map starts empty.
    pub fn with_inputs(&self, inputs: Vec<NodeRef>) -> NodeRef {
        PlannerNode::build(self.kind, self.params.clone(), self.payload.clone(), inputs)
    }

    /// Copy with some parameters replaced and a fresh id.
    pub fn with_params(&self, changes: Params) -> NodeRef {
        let mut params = self.params.clone();
        params.extend(changes);
        PlannerNode::build(self.kind, params, self.payload.clone(), self.inputs.clone())
    }

    pub(crate) fn with_range(&self, begin: u64, end: u64) -> NodeRef {
        self.with_params(range_params(begin, end))
    }
}

impl std::fmt::Debug for PlannerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("inputs", &self.inputs.iter().map(|n| n.id).collect::<Vec<_>>())
            .finish()
    }
}

fn range_params(begin: u64, end: u64) -> Params {
    Params::from([
        (BEGIN_INDEX.to_string(), ParamValue::UInt(begin)),
        (END_INDEX.to_string(), ParamValue::UInt(end)),
    ])
}

/// Scan of a whole table.
pub fn table_source(table: &Table) -> NodeRef {
    PlannerNode::build(
        OperatorKind::TableSource,
        range_params(0, table.num_rows()),
        NodePayload::Table(table.clone()),
        Vec::new(),
    )
}

/// Scan of rows `[begin, end)` of a table.
pub fn table_source_range(table: &Table, begin: u64, end: u64) -> Result<NodeRef> {
    if begin > end || end > table.num_rows() {
        return Err(PlanError::OutOfBounds(format!(
            "rows [{begin}, {end}) of a table with {} rows",
            table.num_rows()
        )));
    }
    Ok(PlannerNode::build(
        OperatorKind::TableSource,
        range_params(begin, end),
        NodePayload::Table(table.clone()),
        Vec::new(),
    ))
}

/// Single `Int64` column holding the row index, over `[begin, end)`.
pub fn range(begin: u64, end: u64) -> Result<NodeRef> {
    if begin > end {
        return Err(PlanError::InvalidPlan(format!("range [{begin}, {end}) is reversed")));
    }
    Ok(PlannerNode::build(
        OperatorKind::Range,
        range_params(begin, end),
        NodePayload::None,
        Vec::new(),
    ))
}

/// `len` copies of `value`.
pub fn constant(value: Scalar, len: u64) -> NodeRef {
    let mut params = range_params(0, len);
    params.insert(VALUE.to_string(), ParamValue::Scalar(value));
    PlannerNode::build(OperatorKind::Constant, params, NodePayload::None, Vec::new())
}

pub fn project(input: &NodeRef, indices: Vec<usize>) -> Result<NodeRef> {
    let width = analysis::num_columns(input)?;
    if indices.is_empty() {
        return Err(PlanError::InvalidPlan("projection of zero columns".into()));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i >= width) {
        return Err(PlanError::InvalidPlan(format!(
            "projection index {bad} out of range for {width} columns"
        )));
    }
    Ok(PlannerNode::build(
        OperatorKind::Project,
        Params::from([(INDICES.to_string(), ParamValue::Indices(indices))]),
        NodePayload::None,
        vec![Arc::clone(input)],
    ))
}

/// Column-wise concatenation of inputs of equal length.
pub fn union(inputs: Vec<NodeRef>) -> Result<NodeRef> {
    if inputs.is_empty() {
        return Err(PlanError::InvalidPlan("union of no inputs".into()));
    }
    Ok(PlannerNode::build(
        OperatorKind::Union,
        Params::new(),
        NodePayload::None,
        inputs,
    ))
}

/// Row-wise concatenation of two inputs with the same columns.
pub fn append(first: &NodeRef, second: &NodeRef) -> Result<NodeRef> {
    let (a, b) = (analysis::output_types(first)?, analysis::output_types(second)?);
    if a.len() != b.len() {
        return Err(PlanError::InvalidPlan(format!(
            "cannot append {} columns to {}",
            b.len(),
            a.len()
        )));
    }
    if let Some((i, (x, y))) = a.iter().zip(&b).enumerate().find(|(_, (x, y))| !x.compatible_with(y)) {
        return Err(PlanError::InvalidPlan(format!(
            "append column {i}: {y} is not compatible with {x}"
        )));
    }
    Ok(PlannerNode::build(
        OperatorKind::Append,
        Params::new(),
        NodePayload::None,
        vec![Arc::clone(first), Arc::clone(second)],
    ))
}

/// Rows of `data` where the single-column `mask` is truthy.
pub fn logical_filter(data: &NodeRef, mask: &NodeRef) -> Result<NodeRef> {
    let width = analysis::num_columns(mask)?;
    if width != 1 {
        return Err(PlanError::InvalidPlan(format!(
            "filter mask must have one column, has {width}"
        )));
    }
    Ok(PlannerNode::build(
        OperatorKind::LogicalFilter,
        Params::new(),
        NodePayload::None,
        vec![Arc::clone(data), Arc::clone(mask)],
    ))
}

/// One column computed row by row from all of `input`'s columns.
pub fn transform(input: &NodeRef, name: impl Into<String>, output_type: DataType, f: RowFn) -> NodeRef {
    PlannerNode::build(
        OperatorKind::Transform,
        Params::from([(NAME.to_string(), ParamValue::Str(name.into()))]),
        NodePayload::Transform { f, output_type },
        vec![Arc::clone(input)],
    )
}

/// One column combining the single columns of `left` and `right` row by
/// row with `op`.
pub fn binary_transform(
    left: &NodeRef,
    right: &NodeRef,
    name: impl Into<String>,
    op: BinaryOp,
) -> Result<NodeRef> {
    let mut types = Vec::with_capacity(2);
    for side in [left, right] {
        let t = analysis::output_types(side)?;
        if t.len() != 1 {
            return Err(PlanError::InvalidPlan(format!(
                "binary transform inputs must have one column, {} has {}",
                side.kind(),
                t.len()
            )));
        }
        types.push(t[0]);
    }
    op.output_type(types[0], types[1])
        .map_err(|e| PlanError::InvalidPlan(e.to_string()))?;
    Ok(PlannerNode::build(
        OperatorKind::BinaryTransform,
        Params::from([
            (NAME.to_string(), ParamValue::Str(name.into())),
            (OP.to_string(), ParamValue::Str(op.symbol().to_string())),
        ]),
        NodePayload::None,
        vec![Arc::clone(left), Arc::clone(right)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_validate_shapes() {
        let r = range(0, 10).unwrap();
        assert!(range(5, 4).is_err());
        assert!(project(&r, vec![1]).is_err());
        assert!(project(&r, vec![]).is_err());
        let two = union(vec![Arc::clone(&r), Arc::clone(&r)]).unwrap();
        assert!(logical_filter(&r, &two).is_err());
        assert!(append(&r, &two).is_err());
        let s = constant(Scalar::Str("x".into()), 3);
        assert!(append(&r, &s).is_err());
        assert!(append(&r, &constant(Scalar::Null, 3)).is_ok());

        let sum = binary_transform(&r, &r, "twice", BinaryOp::Add).unwrap();
        assert_eq!(sum.binary_op().unwrap(), BinaryOp::Add);
        assert!(binary_transform(&r, &two, "x", BinaryOp::Add).is_err());
        assert!(binary_transform(&r, &s, "x", BinaryOp::Sub).is_err());
        assert!(binary_transform(&s, &s, "x", BinaryOp::Eq).is_ok());
    }

    #[test]
    fn copies_get_fresh_ids_and_empty_aux() {
        let r = range(0, 10).unwrap();
        r.set_aux(AUX_LENGTH, ParamValue::UInt(10));
        let c = r.with_range(2, 4);
        assert_ne!(c.id(), r.id());
        assert_eq!(c.source_range().unwrap(), (2, 4));
        assert!(c.get_aux(AUX_LENGTH).is_none());
        assert_eq!(r.get_aux(AUX_LENGTH), Some(ParamValue::UInt(10)));
    }

    #[test]
    fn attributes() {
        assert!(OperatorKind::Constant.is_source());
        assert!(!OperatorKind::Append.attributes().is_linear);
        assert_eq!(OperatorKind::Union.attributes().num_inputs, None);
    }
}
