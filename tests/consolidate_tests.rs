//! Block-level column consolidation and CSV import


use std::io::Write;

use strata_core::schema::DataType;
use strata_core::types::Scalar;
use strata_storage::import::import_csv;
use strata_storage::save_blockwise;
use test_data_gen::{int_column, str_column, test_engine, write_table};

#[test]
fn test_save_blockwise_merges_segments() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let table = write_table(
        engine.store(),
        &dir.path().join("t.sidx"),
        vec![
            ("id", DataType::Int64, int_column(250)),
            ("label", DataType::Utf8, str_column(250)),
        ],
        5,
    );
    let label = table.column_by_name("label").unwrap();
    let target = dir.path().join("label.seg");
    let merged = save_blockwise(label, &target).unwrap();

    assert_eq!(merged.num_segments(), 1);
    assert_eq!(merged.len(), 250);
    assert_eq!(merged.name(), "label");
    assert_eq!(merged.data_type(), DataType::Utf8);
    assert_eq!(merged.to_vec().unwrap(), label.to_vec().unwrap());
    assert!(target.exists());
}

#[test]
fn test_save_blockwise_of_an_appended_column() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let a = write_table(engine.store(), &dir.path().join("a.sidx"), vec![("v", DataType::Int64, int_column(40))], 2);
    let b = write_table(engine.store(), &dir.path().join("b.sidx"), vec![("v", DataType::Int64, int_column(7))], 2);
    let both = a.append(&b).unwrap();
    let merged = save_blockwise(both.column(0).unwrap(), &dir.path().join("v.seg")).unwrap();
    let values = merged.to_vec().unwrap();
    assert_eq!(values.len(), 47);
    assert_eq!(values[39], Scalar::I64(39));
    assert_eq!(values[40], Scalar::I64(0));
    assert_eq!(values[46], Scalar::I64(6));
}

#[test]
fn test_save_blockwise_reports_a_truncated_source_segment() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let store = engine.store();
    let table = write_table(
        store,
        &dir.path().join("t.sidx"),
        vec![("label", DataType::Utf8, str_column(300))],
        3,
    );
    let label = table.column_by_name("label").unwrap();
    let last = label.get_index_info().segments[2].clone();
    let len = std::fs::metadata(&last.file).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&last.file)
        .unwrap()
        .set_len(len / 4)
        .unwrap();

    let direct = (|| -> strata_storage::Result<()> {
        let handle = store.open_column_guard(&last.file, last.column)?;
        store.read_encoded_block(handle.address().block(0))?;
        Ok(())
    })()
    .unwrap_err();

    let before = store.stats();
    let target = dir.path().join("label.seg");
    let err = save_blockwise(label, &target).unwrap_err();
    assert_eq!(std::mem::discriminant(&err), std::mem::discriminant(&direct));
    assert!(matches!(
        err,
        strata_storage::Error::Io(_) | strata_storage::Error::Corrupt { .. }
    ));

    // The two intact segments were opened and each closed exactly once.
    let after = store.stats();
    assert_eq!(after.open_handles, 0);
    assert_eq!(after.opens - before.opens, after.closes - before.closes);
    assert!(after.opens > before.opens);
    assert!(!target.exists());
}

#[test]
fn test_save_blockwise_under_a_file_fails_with_io() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let table = write_table(
        engine.store(),
        &dir.path().join("t.sidx"),
        vec![("id", DataType::Int64, int_column(50))],
        2,
    );
    let before = engine.store().stats();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let target = blocker.join("id.seg");
    let err = save_blockwise(table.column(0).unwrap(), &target).unwrap_err();
    assert!(matches!(err, strata_storage::Error::Io(_)));
    let after = engine.store().stats();
    assert_eq!(after.open_handles, 0);
    assert_eq!(after.opens - before.opens, after.closes - before.closes);
}

#[test]
fn test_import_csv_infers_types_and_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let csv = dir.path().join("in.csv");
    let mut f = std::fs::File::create(&csv).unwrap();
    writeln!(f, "id,price,name,id").unwrap();
    for i in 0..120 {
        writeln!(f, "{i},{}.5,item-{i},{}", i, i * 2).unwrap();
    }
    drop(f);

    let index = dir.path().join("in.sidx");
    let table = import_csv(engine.store(), &csv, &index, 3, true).unwrap();
    assert_eq!(table.num_rows(), 120);
    assert_eq!(table.num_segments(), 3);
    assert_eq!(table.column_names(), vec!["id", "price", "name", "id.1"]);
    assert_eq!(
        table.column_types(),
        vec![DataType::Int64, DataType::Float64, DataType::Utf8, DataType::Int64]
    );
    let row = table.to_batch().unwrap().row(119);
    assert_eq!(
        row,
        vec![
            Scalar::I64(119),
            Scalar::F64(119.5),
            Scalar::Str("item-119".into()),
            Scalar::I64(238)
        ]
    );

    let reopened = engine.open_table(&index.to_string_lossy()).unwrap();
    assert_eq!(reopened.num_rows(), 120);
}
