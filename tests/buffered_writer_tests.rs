//! Buffered writers sharing one locked sink


use std::sync::{Arc, Mutex};
use std::thread;

use strata_core::schema::DataType;
use strata_core::types::Scalar;
use strata_storage::{BlockStore, BufferedWriter, SegmentOutput, TableWriter};
use test_data_gen::test_config;

#[test]
fn test_threads_share_a_vec_sink() {
    let sink: Mutex<Vec<u64>> = Mutex::new(Vec::new());
    thread::scope(|s| {
        for t in 0..4u64 {
            let sink = &sink;
            s.spawn(move || {
                let mut w = BufferedWriter::new(sink, 4, 8).unwrap();
                for i in 0..1_000 {
                    w.write(t * 10_000 + i).unwrap();
                }
                w.flush().unwrap();
                assert_eq!(w.pending(), 0);
            });
        }
    });
    let mut all = sink.into_inner().unwrap();
    assert_eq!(all.len(), 4_000);
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 4_000);
}

#[test]
fn test_per_thread_order_is_kept() {
    let sink: Mutex<Vec<(u8, u32)>> = Mutex::new(Vec::new());
    thread::scope(|s| {
        for t in 0..3u8 {
            let sink = &sink;
            s.spawn(move || {
                let mut w = BufferedWriter::new(sink, 4, 8).unwrap();
                for i in 0..500 {
                    w.write((t, i)).unwrap();
                }
                w.flush().unwrap();
            });
        }
    });
    let all = sink.into_inner().unwrap();
    for t in 0..3u8 {
        let mine: Vec<u32> = all.iter().filter(|(o, _)| *o == t).map(|(_, i)| *i).collect();
        assert_eq!(mine, (0..500).collect::<Vec<_>>());
    }
}

#[test]
fn test_writers_fill_one_segment_output() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(&test_config(dir.path())).unwrap());
    let mut writer = TableWriter::open_for_write(
        &store,
        dir.path().join("shared.sidx"),
        vec!["v".into()],
        vec![DataType::Int64],
        1,
    )
    .unwrap();
    let out = Mutex::new(writer.output(0).unwrap());
    thread::scope(|s| {
        for t in 0..3i64 {
            let out = &out;
            s.spawn(move || {
                let mut w = BufferedWriter::<Scalar, SegmentOutput>::new(out, 4, 8).unwrap();
                for i in 0..100 {
                    w.write(Scalar::I64(t * 1_000 + i)).unwrap();
                }
                w.flush().unwrap();
            });
        }
    });
    let rows = out.into_inner().unwrap().finish().unwrap();
    assert_eq!(rows, 300);

    let table = writer.close().unwrap();
    let mut values: Vec<i64> = table
        .column(0)
        .unwrap()
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|v| match v {
            Scalar::I64(i) => i,
            _ => -1,
        })
        .collect();
    values.sort_unstable();
    let expected: Vec<i64> = (0..3).flat_map(|t| (0..100).map(move |i| t * 1_000 + i)).collect();
    assert_eq!(values, expected);
}
