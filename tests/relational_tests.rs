//! Group-by, join and element-wise binary transforms through the engine


use std::sync::Arc;

use strata_core::schema::DataType;
use strata_core::types::Scalar;
use strata_core::BinaryOp;
use strata_exec::{Aggregate, AggregateKind, ExecError, JoinKind, MaterializeOptions};
use strata_planner::{binary_transform, constant, logical_filter, range, transform, NodeRef};
use strata_storage::Table;
use test_data_gen::{int_column, ints, str_column, test_engine, write_table};

fn rows_of(table: &Table) -> Vec<Vec<Scalar>> {
    let batch = table.to_batch().unwrap();
    let mut rows: Vec<Vec<Scalar>> = (0..batch.num_rows()).map(|r| batch.row(r)).collect();
    rows.sort_by_key(|r| format!("{r:?}"));
    rows
}

fn even_mask(input: &NodeRef) -> NodeRef {
    transform(
        input,
        "even",
        DataType::Int64,
        Arc::new(|row: &[Scalar]| match row[0] {
            Scalar::I64(i) => Scalar::I64((i % 2 == 0) as i64),
            _ => Scalar::I64(0),
        }),
    )
}

#[test]
fn test_binary_transform_agrees_across_modes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let r = range(0, 90).unwrap();
    let shifted = binary_transform(&r, &constant(Scalar::I64(3), 90), "shifted", BinaryOp::Add).unwrap();
    let squared = binary_transform(&shifted, &r, "product", BinaryOp::Mul).unwrap();

    let expected: Vec<i64> = (0..90).map(|i| (i + 3) * i).collect();
    for naive_mode in [false, true] {
        for disable_optimization in [false, true] {
            let opts = MaterializeOptions {
                num_segments: 3,
                naive_mode,
                disable_optimization,
                ..MaterializeOptions::default()
            };
            let table = engine.materialize(&squared, &opts).unwrap();
            assert_eq!(table.column_names(), vec!["product".to_string()]);
            assert_eq!(ints(&table, 0), expected);
        }
    }
}

#[test]
fn test_binary_transform_over_equally_filtered_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let r = range(0, 41).unwrap();
    let mask = even_mask(&r);
    let left = logical_filter(&r, &mask).unwrap();
    let right = logical_filter(&r, &mask).unwrap();
    let cmp = binary_transform(&left, &right, "same", BinaryOp::Eq).unwrap();

    let table = engine.materialize(&cmp, &MaterializeOptions::default()).unwrap();
    assert_eq!(table.num_rows(), 21);
    assert!(ints(&table, 0).iter().all(|&v| v == 1));
}

#[test]
fn test_binary_transform_rejects_mismatched_types() {
    let r = range(0, 4).unwrap();
    let words = constant(Scalar::Str("a".into()), 4);
    assert!(binary_transform(&r, &words, "bad", BinaryOp::Sub).is_err());
    assert!(binary_transform(&r, &words, "ok", BinaryOp::Eq).is_ok());
}

#[test]
fn test_groupby_aggregates_each_key_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let keys: Vec<Scalar> = (0..100).map(|i| if i == 99 { Scalar::Null } else { Scalar::I64(i % 5) }).collect();
    let values: Vec<Scalar> = (0..100).map(|i| if i % 10 == 3 { Scalar::Null } else { Scalar::I64(i) }).collect();
    let table = write_table(
        engine.store(),
        &dir.path().join("g.sidx"),
        vec![("key", DataType::Int64, keys.clone()), ("value", DataType::Int64, values.clone())],
        4,
    );

    let aggs = [
        Aggregate::count("rows"),
        Aggregate::new(AggregateKind::Count, 1, "values"),
        Aggregate::new(AggregateKind::Sum, 1, "sum"),
        Aggregate::new(AggregateKind::Max, 1, "max"),
        Aggregate::new(AggregateKind::Mean, 1, "mean"),
    ];
    let out = engine.groupby_aggregate(&table, &[0], &aggs).unwrap();
    assert_eq!(out.column_names(), vec!["key", "rows", "values", "sum", "max", "mean"]);
    assert_eq!(
        out.column_types(),
        vec![DataType::Int64, DataType::Int64, DataType::Int64, DataType::Int64, DataType::Int64, DataType::Float64]
    );

    let groups = rows_of(&out);
    assert_eq!(groups.len(), 6);
    for g in &groups {
        let members: Vec<i64> = (0..100).filter(|&i| keys[i as usize] == g[0]).collect();
        let present: Vec<i64> = members.iter().copied().filter(|&i| !values[i as usize].is_null()).collect();
        assert_eq!(g[1], Scalar::I64(members.len() as i64));
        assert_eq!(g[2], Scalar::I64(present.len() as i64));
        assert_eq!(g[3], Scalar::I64(present.iter().sum()));
        assert_eq!(g[4], Scalar::I64(*present.iter().max().unwrap()));
        let mean = present.iter().sum::<i64>() as f64 / present.len() as f64;
        match g[5] {
            Scalar::F64(m) => assert!((m - mean).abs() < 1e-9, "mean {m} != {mean}"),
            ref other => panic!("mean is {other:?}"),
        }
    }
}

#[test]
fn test_groupby_on_two_string_keys() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let a: Vec<Scalar> = (0..60).map(|i| Scalar::Str(["x", "y"][i % 2].into())).collect();
    let b: Vec<Scalar> = (0..60).map(|i| Scalar::Str(["p", "q", "r"][i % 3].into())).collect();
    let table = write_table(
        engine.store(),
        &dir.path().join("s.sidx"),
        vec![("a", DataType::Utf8, a), ("b", DataType::Utf8, b), ("n", DataType::Int64, int_column(60))],
        3,
    );

    let out = engine
        .groupby_aggregate(&table, &[0, 1], &[Aggregate::new(AggregateKind::Min, 2, "n")])
        .unwrap();
    let groups = rows_of(&out);
    assert_eq!(groups.len(), 6);
    assert_eq!(out.column_names(), vec!["a", "b", "n"]);
    // Each (a, b) pair first appears within the first six rows.
    let mut firsts: Vec<Scalar> = groups.iter().map(|g| g[2].clone()).collect();
    firsts.sort_by_key(|v| format!("{v:?}"));
    assert_eq!(firsts, (0..6).map(Scalar::I64).collect::<Vec<_>>());
}

#[test]
fn test_groupby_rejects_bad_columns() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let table = write_table(
        engine.store(),
        &dir.path().join("b.sidx"),
        vec![("k", DataType::Int64, int_column(8)), ("s", DataType::Utf8, str_column(8))],
        2,
    );
    let mean_of_text = [Aggregate::new(AggregateKind::Mean, 1, "m")];
    assert!(matches!(
        engine.groupby_aggregate(&table, &[0], &mean_of_text),
        Err(ExecError::Operator(_))
    ));
    let out_of_range = [Aggregate::new(AggregateKind::Sum, 7, "s")];
    assert!(matches!(
        engine.groupby_aggregate(&table, &[0], &out_of_range),
        Err(ExecError::Invalid(_))
    ));
    assert!(engine.groupby_aggregate(&table, &[], &[Aggregate::count("n")]).is_err());
}

fn join_inputs(engine: &strata_exec::Engine, dir: &std::path::Path) -> (Table, Table) {
    let left = write_table(
        engine.store(),
        &dir.join("left.sidx"),
        vec![
            ("id", DataType::Int64, (0..10).map(Scalar::I64).collect()),
            ("name", DataType::Utf8, str_column(10)),
        ],
        2,
    );
    let mut ids: Vec<Scalar> = (5..15).map(Scalar::I64).collect();
    ids.push(Scalar::I64(7));
    ids.push(Scalar::Null);
    let scores: Vec<Scalar> = (0..12).map(|i| Scalar::I64(100 + i)).collect();
    let right = write_table(
        engine.store(),
        &dir.join("right.sidx"),
        vec![("score", DataType::Int64, scores), ("id", DataType::Int64, ids)],
        3,
    );
    (left, right)
}

#[test]
fn test_inner_join_matches_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (left, right) = join_inputs(&engine, dir.path());

    let out = engine.join(&left, &right, &[(0, 1)], JoinKind::Inner).unwrap();
    assert_eq!(out.column_names(), vec!["id", "name", "score"]);
    let rows = rows_of(&out);
    // ids 5..10 match once each, id 7 twice.
    assert_eq!(rows.len(), 6);
    let sevens: Vec<&Vec<Scalar>> = rows.iter().filter(|r| r[0] == Scalar::I64(7)).collect();
    assert_eq!(sevens.len(), 2);
    assert!(sevens.iter().any(|r| r[2] == Scalar::I64(102)));
    assert!(sevens.iter().any(|r| r[2] == Scalar::I64(110)));
    assert!(rows.iter().all(|r| r[1] != Scalar::Null));
}

#[test]
fn test_outer_joins_fill_the_missing_side_with_nulls() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (left, right) = join_inputs(&engine, dir.path());

    let l = rows_of(&engine.join(&left, &right, &[(0, 1)], JoinKind::Left).unwrap());
    assert_eq!(l.len(), 11);
    assert_eq!(l.iter().filter(|r| r[2].is_null()).count(), 5);

    let r = rows_of(&engine.join(&left, &right, &[(0, 1)], JoinKind::Right).unwrap());
    // 6 matches, ids 10..15 and the null-keyed row unmatched.
    assert_eq!(r.len(), 12);
    let unmatched: Vec<&Vec<Scalar>> = r.iter().filter(|r| r[1].is_null()).collect();
    assert_eq!(unmatched.len(), 6);
    assert!(unmatched.iter().any(|r| r[0] == Scalar::I64(12) && r[2] == Scalar::I64(107)));
    assert!(unmatched.iter().any(|r| r[0].is_null() && r[2] == Scalar::I64(111)));

    let full = engine.join(&left, &right, &[(0, 1)], JoinKind::Outer).unwrap();
    assert_eq!(full.num_rows(), 17);
}

#[test]
fn test_join_key_types_must_match() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (left, right) = join_inputs(&engine, dir.path());
    assert!(matches!(
        engine.join(&left, &right, &[(1, 1)], JoinKind::Inner),
        Err(ExecError::Invalid(_))
    ));
    assert!(matches!(
        engine.join(&left, &right, &[(0, 4)], JoinKind::Inner),
        Err(ExecError::Invalid(_))
    ));
    assert!(engine.join(&left, &right, &[], JoinKind::Inner).is_err());
}

#[test]
fn test_join_result_is_removed_when_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (left, right) = join_inputs(&engine, dir.path());
    let before = std::fs::read_dir(dir.path()).unwrap().count();
    let out = engine.join(&left, &right, &[(0, 1)], JoinKind::Inner).unwrap();
    assert_eq!(out.num_rows(), 6);
    drop(out);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), before);
}
