use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use strata_core::config::EngineConfig;
use strata_core::schema::DataType;
use strata_core::types::Scalar;
use strata_exec::{Engine, MaterializeOptions};
use strata_planner::{logical_filter, range, transform, union, NodeRef};

fn filtered_graph(rows: u64) -> NodeRef {
    let r = range(0, rows).unwrap();
    let doubled = transform(
        &r,
        "doubled",
        DataType::Int64,
        Arc::new(|row: &[Scalar]| match row[0] {
            Scalar::I64(i) => Scalar::I64(i * 2),
            _ => Scalar::Null,
        }),
    );
    let mask = transform(
        &r,
        "sparse",
        DataType::Boolean,
        Arc::new(|row: &[Scalar]| match row[0] {
            Scalar::I64(i) => Scalar::Bool(i % 1_000 < 10),
            _ => Scalar::Bool(false),
        }),
    );
    let data = union(vec![r, doubled]).unwrap();
    logical_filter(&data, &mask).unwrap()
}

fn bench_materialize(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(EngineConfig {
        block_size: 1024,
        temp_dir: dir.path().to_string_lossy().into_owned(),
        ..EngineConfig::default()
    })
    .unwrap();
    let graph = filtered_graph(200_000);
    let opts = MaterializeOptions {
        num_segments: 4,
        ..MaterializeOptions::default()
    };
    c.bench_function("materialize_sparse_filter", |b| {
        b.iter(|| {
            let t = engine.materialize(&graph, &opts).unwrap();
            assert_eq!(t.num_rows(), 2_000);
        })
    });

    let table = engine.materialize(&range(0, 200_000).unwrap(), &opts).unwrap();
    c.bench_function("scan_table", |b| {
        b.iter(|| {
            let batch = table.to_batch().unwrap();
            assert_eq!(batch.num_rows(), 200_000);
        })
    });
}

criterion_group!(materialize, bench_materialize);
criterion_main!(materialize);
