use branchindex::config::IndexEngineConfig;
use branchindex::tree::node::{LeafEntry, ValueEntry};
use branchindex::tree::BPlusTree;
use branchindex::types::{RecordPointer, TypedValue};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn sorted_entries(n: i64) -> Vec<LeafEntry> {
    (0..n)
        .map(|i| LeafEntry {
            key: TypedValue::Int(i),
            values: vec![ValueEntry {
                record_pointer: RecordPointer::new(vec![], format!("r{i}")),
                metadata: vec![],
            }],
        })
        .collect()
}

fn populated_tree(n: i64) -> BPlusTree {
    BPlusTree::from_sorted_entries(sorted_entries(n), IndexEngineConfig::default(), 0, true, 0.7)
}

fn bench_bulk_build(c: &mut Criterion) {
    c.bench_function("bulk_build_10k", |b| {
        b.iter_batched(
            || sorted_entries(10_000),
            |entries| BPlusTree::from_sorted_entries(entries, IndexEngineConfig::default(), 0, true, 0.7),
            BatchSize::LargeInput,
        );
    });
}

fn bench_point_find(c: &mut Criterion) {
    let tree = populated_tree(10_000);
    c.bench_function("point_find_10k", |b| {
        b.iter(|| tree.find(&TypedValue::Int(5_000)).unwrap());
    });
}

fn bench_range_search(c: &mut Criterion) {
    use branchindex::tree::ops::Operator;
    let tree = populated_tree(10_000);
    c.bench_function("range_search_10k", |b| {
        b.iter(|| {
            tree.search(&Operator::Between(TypedValue::Int(1_000), TypedValue::Int(2_000)))
                .unwrap()
        });
    });
}

fn bench_incremental_add(c: &mut Criterion) {
    c.bench_function("incremental_add_1k", |b| {
        b.iter_batched(
            || BPlusTree::new_empty(IndexEngineConfig::default(), 0, true),
            |mut tree| {
                for i in 0..1_000 {
                    tree.add(TypedValue::Int(i), RecordPointer::new(vec![], format!("r{i}")), vec![]).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_bulk_build, bench_point_find, bench_range_search, bench_incremental_add);
criterion_main!(benches);
