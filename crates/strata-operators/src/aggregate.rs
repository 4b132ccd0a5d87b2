//! Per-group aggregation states.
//!
//! Each group keeps one `AggState` per requested aggregate. Nulls are ignored
//! by every aggregate except a `Count` without a column, which counts rows.

use strata_core::ops::BinaryOp;
use strata_core::schema::DataType;
use strata_core::types::Scalar;

use crate::traits::{OpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Mean,
    /// Population variance.
    Variance,
    /// Population standard deviation.
    Std,
}

impl AggregateKind {
    pub fn name(self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Mean => "mean",
            AggregateKind::Variance => "var",
            AggregateKind::Std => "std",
        }
    }

    /// Output column type for an input column of type `input` (`None` for a
    /// row count).
    pub fn output_type(self, input: Option<DataType>) -> Result<DataType> {
        match (self, input) {
            (AggregateKind::Count, _) => Ok(DataType::Int64),
            (_, None) => Err(OpError::Plan(format!("{} needs an input column", self.name()))),
            (AggregateKind::Min | AggregateKind::Max, Some(t)) => Ok(t),
            (AggregateKind::Sum, Some(DataType::Int64)) => Ok(DataType::Int64),
            (_, Some(DataType::Int64 | DataType::Float64 | DataType::Undefined)) => Ok(DataType::Float64),
            (_, Some(t)) => Err(OpError::Plan(format!("{} of a {t} column", self.name()))),
        }
    }
}

/// One output column of a group-by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub kind: AggregateKind,
    /// Input column; `None` only for a row count.
    pub column: Option<usize>,
    pub name: String,
}

impl Aggregate {
    pub fn new(kind: AggregateKind, column: usize, name: impl Into<String>) -> Self {
        Self {
            kind,
            column: Some(column),
            name: name.into(),
        }
    }

    /// Number of rows in the group.
    pub fn count(name: impl Into<String>) -> Self {
        Self {
            kind: AggregateKind::Count,
            column: None,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggState {
    Count(u64),
    IntSum(i64),
    FloatSum(f64),
    Extreme { best: Option<Scalar>, min: bool },
    /// Running mean and sum of squared deviations (Welford).
    Moments { n: u64, mean: f64, m2: f64, kind: AggregateKind },
}

impl AggState {
    pub fn new(kind: AggregateKind, input: Option<DataType>) -> Self {
        match kind {
            AggregateKind::Count => AggState::Count(0),
            AggregateKind::Sum if input == Some(DataType::Int64) => AggState::IntSum(0),
            AggregateKind::Sum => AggState::FloatSum(0.0),
            AggregateKind::Min | AggregateKind::Max => AggState::Extreme {
                best: None,
                min: kind == AggregateKind::Min,
            },
            AggregateKind::Mean | AggregateKind::Variance | AggregateKind::Std => AggState::Moments {
                n: 0,
                mean: 0.0,
                m2: 0.0,
                kind,
            },
        }
    }

    /// Fold in one row. `value` is `None` when the aggregate has no column.
    pub fn update(&mut self, value: Option<&Scalar>) -> Result<()> {
        let Some(v) = value else {
            return match self {
                AggState::Count(n) => {
                    *n += 1;
                    Ok(())
                }
                _ => Err(OpError::Exec("aggregate is missing its input value".into())),
            };
        };
        if v.is_null() {
            return Ok(());
        }
        match (self, v) {
            (AggState::Count(n), _) => *n += 1,
            (AggState::IntSum(sum), Scalar::I64(i)) => *sum = sum.wrapping_add(*i),
            (AggState::FloatSum(sum), v) => *sum += number(v)?,
            (AggState::Extreme { best, min }, v) => {
                let op = if *min { BinaryOp::Lt } else { BinaryOp::Gt };
                let replace = match best {
                    None => true,
                    Some(b) => op.apply(v, b).is_truthy(),
                };
                if replace {
                    *best = Some(v.clone());
                }
            }
            (AggState::Moments { n, mean, m2, .. }, v) => {
                let x = number(v)?;
                *n += 1;
                let delta = x - *mean;
                *mean += delta / *n as f64;
                *m2 += delta * (x - *mean);
            }
            (AggState::IntSum(_), v) => {
                return Err(OpError::Exec(format!("cannot add {v:?} to an integer sum")))
            }
        }
        Ok(())
    }

    pub fn finish(&self) -> Scalar {
        match self {
            AggState::Count(n) => Scalar::I64(*n as i64),
            AggState::IntSum(s) => Scalar::I64(*s),
            AggState::FloatSum(s) => Scalar::F64(*s),
            AggState::Extreme { best, .. } => best.clone().unwrap_or(Scalar::Null),
            AggState::Moments { n: 0, .. } => Scalar::Null,
            AggState::Moments { n, mean, m2, kind } => match kind {
                AggregateKind::Mean => Scalar::F64(*mean),
                AggregateKind::Std => Scalar::F64((m2 / *n as f64).sqrt()),
                _ => Scalar::F64(m2 / *n as f64),
            },
        }
    }
}

fn number(v: &Scalar) -> Result<f64> {
    match v {
        Scalar::I64(i) => Ok(*i as f64),
        Scalar::F64(f) => Ok(*f),
        other => Err(OpError::Exec(format!("{other:?} is not a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(kind: AggregateKind, input: DataType, values: &[Scalar]) -> Scalar {
        let mut s = AggState::new(kind, Some(input));
        for v in values {
            s.update(Some(v)).unwrap();
        }
        s.finish()
    }

    #[test]
    fn numeric_aggregates_skip_nulls() {
        let v = [Scalar::I64(2), Scalar::Null, Scalar::I64(4), Scalar::I64(9)];
        assert_eq!(fold(AggregateKind::Sum, DataType::Int64, &v), Scalar::I64(15));
        assert_eq!(fold(AggregateKind::Count, DataType::Int64, &v), Scalar::I64(3));
        assert_eq!(fold(AggregateKind::Mean, DataType::Int64, &v), Scalar::F64(5.0));
        assert_eq!(fold(AggregateKind::Variance, DataType::Int64, &v), Scalar::F64(26.0 / 3.0));
        assert_eq!(fold(AggregateKind::Min, DataType::Int64, &v), Scalar::I64(2));
        assert_eq!(fold(AggregateKind::Max, DataType::Int64, &v), Scalar::I64(9));
        assert_eq!(fold(AggregateKind::Mean, DataType::Int64, &[Scalar::Null]), Scalar::Null);
    }

    #[test]
    fn row_count_and_string_extremes() {
        let mut rows = AggState::new(AggregateKind::Count, None);
        for _ in 0..5 {
            rows.update(None).unwrap();
        }
        assert_eq!(rows.finish(), Scalar::I64(5));
        let words = ["pear", "apple", "fig"].map(|w| Scalar::Str(w.into()));
        assert_eq!(fold(AggregateKind::Min, DataType::Utf8, &words), Scalar::Str("apple".into()));
        assert_eq!(fold(AggregateKind::Max, DataType::Utf8, &words), Scalar::Str("pear".into()));
    }

    #[test]
    fn output_types() {
        assert_eq!(AggregateKind::Sum.output_type(Some(DataType::Int64)).unwrap(), DataType::Int64);
        assert_eq!(AggregateKind::Sum.output_type(Some(DataType::Float64)).unwrap(), DataType::Float64);
        assert_eq!(AggregateKind::Std.output_type(Some(DataType::Int64)).unwrap(), DataType::Float64);
        assert_eq!(AggregateKind::Max.output_type(Some(DataType::Utf8)).unwrap(), DataType::Utf8);
        assert!(AggregateKind::Mean.output_type(Some(DataType::Utf8)).is_err());
        assert!(AggregateKind::Sum.output_type(None).is_err());
        assert_eq!(AggregateKind::Count.output_type(None).unwrap(), DataType::Int64);
    }
}
