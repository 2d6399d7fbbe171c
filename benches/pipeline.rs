use std::collections::HashMap;

use async_trait::async_trait;
use branchindex::index::{IndexSpec, IndexType};
use branchindex::primary_store::{ChildNode, PrimaryStore};
use branchindex::types::TypedValue;
use branchindex::{config::IndexEngineConfig, pipeline, Result};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

struct FlatStore {
    children: HashMap<String, Vec<ChildNode>>,
    values: HashMap<String, TypedValue>,
}

impl FlatStore {
    fn songs(n: i64) -> Self {
        let mut children = HashMap::new();
        let mut values = HashMap::new();
        let mut kids = Vec::with_capacity(n as usize);
        for i in 0..n {
            let key = format!("s{i}");
            kids.push(ChildNode { key: key.clone(), value: TypedValue::Undefined });
            values.insert(format!("songs/{key}/year"), TypedValue::Int(1950 + (i % 75)));
        }
        children.insert("songs".to_string(), kids);
        Self { children, values }
    }
}

#[async_trait]
impl PrimaryStore for FlatStore {
    async fn get_children(&self, path: &str, key_filter: Option<&str>) -> Result<Vec<ChildNode>> {
        let all = self.children.get(path).cloned().unwrap_or_default();
        Ok(match key_filter {
            Some(k) => all.into_iter().filter(|c| c.key == k).collect(),
            None => all,
        })
    }

    async fn get_value(&self, path: &str) -> Result<TypedValue> {
        Ok(self.values.get(path).cloned().unwrap_or(TypedValue::Undefined))
    }
}

fn song_year_spec() -> IndexSpec {
    IndexSpec {
        path: "songs".into(),
        key: "year".into(),
        include_keys: vec![],
        case_sensitive: true,
        locale: "en".into(),
        index_type: IndexType::Normal,
    }
}

fn bench_full_build(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = FlatStore::songs(5_000);
    let spec = song_year_spec();
    let cfg = IndexEngineConfig::default();

    c.bench_function("full_build_5k_records", |b| {
        b.to_async(&rt).iter_batched(
            || (),
            |_| async {
                let metadata_count = spec.metadata_keys().len();
                pipeline::run_build(&store, &spec, &cfg, metadata_count).await.unwrap()
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_full_build);
criterion_main!(benches);
