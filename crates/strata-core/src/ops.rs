//! Element-wise binary operators over scalars.
//!
//! Arithmetic follows the numeric types of its operands: two integers stay
//! integral (except `/` and `**`), anything involving a float is a float.
//! Comparisons and the logical operators produce `1` or `0` as `Int64`. A null
//! operand yields null, except for `==`, `!=`, `&` and `|`, which always
//! answer.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

const ALL: [BinaryOp; 15] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::Div,
    BinaryOp::FloorDiv,
    BinaryOp::Mod,
    BinaryOp::Pow,
    BinaryOp::Lt,
    BinaryOp::Gt,
    BinaryOp::Le,
    BinaryOp::Ge,
    BinaryOp::Eq,
    BinaryOp::Ne,
    BinaryOp::And,
    BinaryOp::Or,
];

fn numeric(t: DataType) -> bool {
    matches!(t, DataType::Int64 | DataType::Float64 | DataType::Undefined)
}

/// Result type of `+`, `-`, `*` and `//` on numeric operands.
fn widened(l: DataType, r: DataType) -> DataType {
    match (l, r) {
        (DataType::Float64, _) | (_, DataType::Float64) => DataType::Float64,
        (DataType::Int64, _) | (_, DataType::Int64) => DataType::Int64,
        _ => DataType::Undefined,
    }
}

fn flag(b: bool) -> Scalar {
    Scalar::I64(b as i64)
}

fn as_f64(v: &Scalar) -> Option<f64> {
    match v {
        Scalar::I64(i) => Some(*i as f64),
        Scalar::F64(f) => Some(*f),
        _ => None,
    }
}

fn compare(l: &Scalar, r: &Scalar) -> Option<Ordering> {
    match (l, r) {
        (Scalar::I64(a), Scalar::I64(b)) => Some(a.cmp(b)),
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (Scalar::Bin(a), Scalar::Bin(b)) => Some(a.cmp(b)),
        _ => as_f64(l)?.partial_cmp(&as_f64(r)?),
    }
}

fn equal(l: &Scalar, r: &Scalar) -> bool {
    match (l, r) {
        (Scalar::I64(_), Scalar::F64(_)) | (Scalar::F64(_), Scalar::I64(_)) => {
            compare(l, r) == Some(Ordering::Equal)
        }
        _ => l == r,
    }
}

/// Floor division of integers; `None` on a zero divisor or overflow.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    Some(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

/// Remainder carrying the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
        }
    }

    pub fn from_symbol(s: &str) -> Result<Self> {
        ALL.into_iter()
            .find(|op| op.symbol() == s)
            .ok_or_else(|| Error::Schema(format!("unknown binary operator '{s}'")))
    }

    /// Type of `left op right`, or an error when the operator does not apply
    /// to these column types.
    pub fn output_type(self, left: DataType, right: DataType) -> Result<DataType> {
        let feasible = match self {
            BinaryOp::Add => {
                (numeric(left) && numeric(right)) || (left == DataType::Utf8 && right == DataType::Utf8)
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Pow => {
                numeric(left) && numeric(right)
            }
            BinaryOp::Mod => {
                matches!(left, DataType::Int64 | DataType::Undefined)
                    && matches!(right, DataType::Int64 | DataType::Undefined)
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                (numeric(left) && numeric(right))
                    || left == right
                    || left == DataType::Undefined
                    || right == DataType::Undefined
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => true,
        };
        if !feasible {
            return Err(Error::Schema(format!(
                "cannot apply '{}' to {left} and {right}",
                self.symbol()
            )));
        }
        Ok(match self {
            BinaryOp::Add if left == DataType::Utf8 => DataType::Utf8,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::FloorDiv => widened(left, right),
            BinaryOp::Div | BinaryOp::Pow => DataType::Float64,
            _ => DataType::Int64,
        })
    }

    pub fn apply(self, left: &Scalar, right: &Scalar) -> Scalar {
        match self {
            BinaryOp::Eq => return flag(equal(left, right)),
            BinaryOp::Ne => return flag(!equal(left, right)),
            BinaryOp::And => return flag(left.is_truthy() && right.is_truthy()),
            BinaryOp::Or => return flag(left.is_truthy() || right.is_truthy()),
            _ => {}
        }
        if left.is_null() || right.is_null() {
            return Scalar::Null;
        }
        let ordered = |want: fn(Ordering) -> bool| match compare(left, right) {
            Some(o) => flag(want(o)),
            None => Scalar::Null,
        };
        match self {
            BinaryOp::Lt => return ordered(Ordering::is_lt),
            BinaryOp::Gt => return ordered(Ordering::is_gt),
            BinaryOp::Le => return ordered(Ordering::is_le),
            BinaryOp::Ge => return ordered(Ordering::is_ge),
            _ => {}
        }
        match (self, left, right) {
            (BinaryOp::Add, Scalar::Str(a), Scalar::Str(b)) => Scalar::Str(format!("{a}{b}")),
            (BinaryOp::Add, Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a.wrapping_add(*b)),
            (BinaryOp::Sub, Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a.wrapping_sub(*b)),
            (BinaryOp::Mul, Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a.wrapping_mul(*b)),
            (BinaryOp::FloorDiv, Scalar::I64(a), Scalar::I64(b)) => {
                floor_div(*a, *b).map_or(Scalar::Null, Scalar::I64)
            }
            (BinaryOp::Mod, Scalar::I64(a), Scalar::I64(b)) => {
                floor_mod(*a, *b).map_or(Scalar::Null, Scalar::I64)
            }
            (BinaryOp::Mod, _, _) => Scalar::Null,
            _ => {
                let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
                    return Scalar::Null;
                };
                Scalar::F64(match self {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::FloorDiv => (a / b).floor(),
                    BinaryOp::Pow => a.powf(b),
                    _ => return Scalar::Null,
                })
            }
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}
