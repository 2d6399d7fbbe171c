// Stage A: enumerate (spec §4.5). Walks the index path against the
// primary store, resolving each `*` segment via `get_children` with a
// fanout cap that shrinks with wildcard depth, and spills one framed
// `BuildEntry` per (key, metadata) pair the specialization projects out
// of each candidate record.

use super::{write_framed_entry, BuildEntry};
use crate::config::IndexEngineConfig;
use crate::error::Result;
use crate::index::{IndexProjection, IndexSpec};
use crate::io::WriteSink;
use crate::path_utils;
use crate::primary_store::PrimaryStore;
use crate::types::{RecordPointer, TypedValue};

fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// Enumerate every record the index's path addresses, spilling its
/// projected entries to `sink`.
pub async fn enumerate(
    store: &dyn PrimaryStore,
    spec: &IndexSpec,
    projection: &dyn IndexProjection,
    cfg: &IndexEngineConfig,
    sink: &mut dyn WriteSink,
) -> Result<()> {
    let segments: Vec<String> = path_utils::segments(&spec.path).into_iter().map(str::to_string).collect();
    walk(store, spec, projection, cfg, &segments, String::new(), Vec::new(), sink).await
}

fn walk<'a>(
    store: &'a dyn PrimaryStore,
    spec: &'a IndexSpec,
    projection: &'a dyn IndexProjection,
    cfg: &'a IndexEngineConfig,
    remaining: &'a [String],
    resolved: String,
    wildcards: Vec<String>,
    sink: &'a mut dyn WriteSink,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'a>> {
    Box::pin(async move {
        match remaining.split_first() {
            None => index_records(store, spec, projection, &resolved, wildcards, sink).await,
            Some((seg, rest)) if seg == "*" => {
                let wildcards_remaining = rest.iter().filter(|s| *s == "*").count() as u32 + 1;
                let cap = cfg.max_batch_for_wildcards(wildcards_remaining);
                let children = store.get_children(&resolved, None).await?;
                for child in children.into_iter().take(cap) {
                    let next_resolved = join(&resolved, &child.key);
                    let mut next_wildcards = wildcards.clone();
                    next_wildcards.push(child.key.clone());
                    walk(store, spec, projection, cfg, rest, next_resolved, next_wildcards, sink).await?;
                }
                Ok(())
            }
            Some((seg, rest)) => {
                let next_resolved = join(&resolved, seg);
                walk(store, spec, projection, cfg, rest, next_resolved, wildcards, sink).await
            }
        }
    })
}

async fn index_records(
    store: &dyn PrimaryStore,
    spec: &IndexSpec,
    projection: &dyn IndexProjection,
    container_path: &str,
    wildcards: Vec<String>,
    sink: &mut dyn WriteSink,
) -> Result<()> {
    let children = store.get_children(container_path, None).await?;
    for child in children {
        let record_path = join(container_path, &child.key);
        let value = if spec.indexes_child_name() {
            TypedValue::String(child.key.clone())
        } else {
            store.get_value(&join(&record_path, &spec.key)).await?
        };

        let mut include = Vec::with_capacity(spec.include_keys.len());
        for key in &spec.include_keys {
            include.push(store.get_value(&join(&record_path, key)).await?);
        }

        let record_pointer = RecordPointer::new(wildcards.clone(), child.key.clone());
        for (key, metadata) in projection.project_for_build(spec, &value, &include) {
            let entry = BuildEntry { key, record_pointer: record_pointer.clone(), metadata };
            write_framed_entry(sink, &entry).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{normal::Normal, IndexType};
    use crate::io::MemoryWriter;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeStore {
        children: HashMap<String, Vec<crate::primary_store::ChildNode>>,
        values: HashMap<String, TypedValue>,
    }

    #[async_trait]
    impl PrimaryStore for FakeStore {
        async fn get_children(&self, path: &str, _filter: Option<&str>) -> Result<Vec<crate::primary_store::ChildNode>> {
            Ok(self.children.get(path).cloned().unwrap_or_default())
        }

        async fn get_value(&self, path: &str) -> Result<TypedValue> {
            Ok(self.values.get(path).cloned().unwrap_or(TypedValue::Undefined))
        }
    }

    fn spec() -> IndexSpec {
        IndexSpec {
            path: "songs".into(),
            key: "year".into(),
            include_keys: vec!["title".into()],
            case_sensitive: true,
            locale: "en".into(),
            index_type: IndexType::Normal,
        }
    }

    #[tokio::test]
    async fn enumerate_spills_one_entry_per_record() {
        use crate::primary_store::ChildNode;
        let mut children = HashMap::new();
        children.insert(
            "songs".to_string(),
            vec![ChildNode { key: "s1".into(), value: TypedValue::Undefined }, ChildNode { key: "s2".into(), value: TypedValue::Undefined }],
        );
        let mut values = HashMap::new();
        values.insert("songs/s1/year".into(), TypedValue::Int(1999));
        values.insert("songs/s1/title".into(), TypedValue::String("A".into()));
        values.insert("songs/s2/year".into(), TypedValue::Int(2005));
        values.insert("songs/s2/title".into(), TypedValue::String("B".into()));
        let store = FakeStore { children, values };

        let mut sink = MemoryWriter::new();
        enumerate(&store, &spec(), &Normal, &IndexEngineConfig::default(), &mut sink).await.unwrap();

        let mut src = crate::io::MemoryReader::new(&sink.buf);
        let entries = super::super::read_all_framed(&mut src).await.unwrap();
        assert_eq!(entries.len(), 2);
        let mut keys: Vec<&TypedValue> = entries.iter().map(|e| &e.key).collect();
        keys.sort_by_key(|k| format!("{k:?}"));
        assert_eq!(keys, vec![&TypedValue::Int(1999), &TypedValue::Int(2005)]);
    }
}
