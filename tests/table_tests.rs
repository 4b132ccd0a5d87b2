//! Column arrays and tables over segment files


use std::sync::Arc;

use strata_core::schema::DataType;
use strata_core::types::Scalar;
use strata_storage::{BlockStore, ColumnArray, Table};
use test_data_gen::{int_column, str_column, test_config, write_table};

#[test]
fn test_table_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    let index = dir.path().join("t.sidx");
    let written = write_table(
        &store,
        &index,
        vec![
            ("id", DataType::Int64, int_column(123)),
            ("label", DataType::Utf8, str_column(123)),
        ],
        3,
    );
    assert_eq!(written.column(0).unwrap().segment_sizes(), &[41, 41, 41]);

    let reopened = Table::open(&store, &index).unwrap();
    assert_eq!(reopened.num_rows(), 123);
    assert_eq!(reopened.num_segments(), 3);
    assert_eq!(reopened.column_names(), vec!["id", "label"]);
    assert_eq!(reopened.column_types(), vec![DataType::Int64, DataType::Utf8]);
    assert_eq!(reopened.to_batch().unwrap(), written.to_batch().unwrap());
    assert_eq!(reopened.index_path(), Some(index.as_path()));
}

#[test]
fn test_reader_crosses_segment_and_block_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    let table = write_table(
        &store,
        &dir.path().join("t.sidx"),
        vec![("id", DataType::Int64, int_column(200))],
        4,
    );
    let mut reader = table.reader().unwrap();
    let batch = reader.read_rows(45, 155).unwrap();
    assert_eq!(batch.num_rows(), 110);
    assert_eq!(batch.columns[0][0], Scalar::I64(45));
    assert_eq!(batch.columns[0][109], Scalar::I64(154));

    // Reads past the end are clamped.
    let tail = reader.read_rows(190, 1_000).unwrap();
    assert_eq!(tail.num_rows(), 10);
    assert!(reader.read_rows(10, 5).is_err());
}

#[test]
fn test_append_chains_segments_without_copying() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    let a = write_table(&store, &dir.path().join("a.sidx"), vec![("x", DataType::Int64, int_column(10))], 2);
    let b = write_table(&store, &dir.path().join("b.sidx"), vec![("x", DataType::Int64, int_column(5))], 2);

    let both = a.append(&b).unwrap();
    assert_eq!(both.num_rows(), 15);
    assert_eq!(both.num_segments(), 4);
    assert_eq!(both.column(0).unwrap().segment_sizes(), &[5, 5, 2, 3]);
    let values = both.column(0).unwrap().to_vec().unwrap();
    assert_eq!(values[9], Scalar::I64(9));
    assert_eq!(values[10], Scalar::I64(0));

    let other = write_table(&store, &dir.path().join("c.sidx"), vec![("y", DataType::Int64, int_column(5))], 2);
    assert!(a.append(&other).is_err());
}

#[test]
fn test_select_head_and_rename() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    let table = write_table(
        &store,
        &dir.path().join("t.sidx"),
        vec![
            ("a", DataType::Int64, int_column(20)),
            ("b", DataType::Utf8, str_column(20)),
        ],
        2,
    );
    let picked = table.select_columns(&[1, 0]).unwrap();
    assert_eq!(picked.column_names(), vec!["b", "a"]);
    let head = picked.head(3).unwrap();
    assert_eq!(head.num_rows(), 3);
    assert_eq!(head.row(2), vec![Scalar::Str("row-2".into()), Scalar::I64(2)]);
    assert_eq!(table.head(100).unwrap().num_rows(), 20);

    let col: &ColumnArray = table.column_by_name("a").unwrap();
    let renamed = col.renamed("z");
    assert_eq!(renamed.name(), "z");
    assert_eq!(renamed.to_vec().unwrap(), col.to_vec().unwrap());
    assert!(table.column_by_name("missing").is_none());
}

#[test]
fn test_empty_table_and_schema_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    let empty = Table::empty(&store, vec!["a".into()], vec![DataType::Int64]).unwrap();
    assert_eq!(empty.num_rows(), 0);
    assert_eq!(empty.to_batch().unwrap().num_rows(), 0);
    assert!(Table::empty(&store, vec!["a".into()], vec![]).is_err());

    let short = write_table(&store, &dir.path().join("s.sidx"), vec![("a", DataType::Int64, int_column(3))], 1);
    let long = write_table(&store, &dir.path().join("l.sidx"), vec![("b", DataType::Int64, int_column(4))], 1);
    let mixed = Table::from_columns(
        &store,
        vec!["a".into(), "b".into()],
        vec![short.column(0).unwrap().clone(), long.column(0).unwrap().clone()],
    );
    assert!(mixed.is_err());
}

#[test]
fn test_writer_rejects_values_of_the_wrong_type() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    let mut writer = strata_storage::TableWriter::open_for_write(
        &store,
        dir.path().join("bad.sidx"),
        vec!["a".into()],
        vec![DataType::Int64],
        1,
    )
    .unwrap();
    let mut out = writer.output(0).unwrap();
    out.write_value(Scalar::Null).unwrap();
    assert!(out.write_value(Scalar::Str("nope".into())).is_err());
    assert!(writer.output(0).is_err());
    out.finish().unwrap();
    let table = writer.close().unwrap();
    assert_eq!(table.num_rows(), 1);
}

#[test]
fn test_zero_and_one_row_tables_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    for (n, name) in [(0, "zero.sidx"), (1, "one.sidx")] {
        let index = dir.path().join(name);
        write_table(&store, &index, vec![("a", DataType::Int64, int_column(n))], 2);
        let t = Table::open(&store, &index).unwrap();
        assert_eq!(t.num_rows(), n as u64);
        assert_eq!(t.num_segments(), 2);
        assert_eq!(t.column(0).unwrap().to_vec().unwrap(), int_column(n));
    }
}
