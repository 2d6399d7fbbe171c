// Index base (spec §4.6, §3): ties the envelope, codec, tree, cache, and
// lock into one addressable index instance, and defines the capability
// interface the four type specializations implement.
//
// "Opaque runtime polymorphism" (spec §9 redesign flag): rather than a
// class hierarchy with a shared mutable base, each index type is a small
// stateless `IndexProjection` impl selected once at construction and
// boxed; the shared tree remains the single concrete `BPlusTree`.

pub mod array;
pub mod fulltext;
pub mod geo;
pub mod normal;

use crate::cache::{CacheKey, QueryCache};
use crate::codec;
use crate::config::IndexEngineConfig;
use crate::error::{IndexError, Result};
use crate::lock::IndexLock;
use crate::metrics::write_performance::WritePerformanceMonitor;
use crate::observability::{record_metric, MetricType};
use crate::primary_store::ChangeEvent;
use crate::tree::{BPlusTree, Match, TreeOp};
use crate::types::{Metadata, RecordPointer, TypedValue};
use std::time::Instant;
use tokio::sync::RwLock as AsyncRwLock;

/// The four index specializations (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IndexType {
    Normal,
    Array,
    FullText,
    Geo,
}

/// An index's immutable configuration (spec §3 "Index" entity). `key ==
/// "{key}"` is the sentinel meaning "index the child's own name" rather
/// than a field within it.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub path: String,
    pub key: String,
    pub include_keys: Vec<String>,
    pub case_sensitive: bool,
    pub locale: String,
    pub index_type: IndexType,
}

impl IndexSpec {
    /// Fixed metadata schema: `include_keys[]` plus any index-specific
    /// extras, in the order every `Value`'s metadata tuple follows.
    pub fn metadata_keys(&self) -> Vec<String> {
        let mut keys = self.include_keys.clone();
        match self.index_type {
            IndexType::FullText => keys.push("_occurs_".into()),
            IndexType::Geo => {
                keys.push("_lat_".into());
                keys.push("_long_".into());
            }
            _ => {}
        }
        keys
    }

    pub fn indexes_child_name(&self) -> bool {
        crate::path_utils::is_key_sentinel(&self.key)
    }
}

/// One decoded query match, with metadata unpacked into `(key_name,
/// value)` pairs per `IndexSpec::metadata_keys`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQueryResult {
    pub key: TypedValue,
    pub record_pointer: RecordPointer,
    pub metadata: Vec<(String, TypedValue)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub results: Vec<IndexQueryResult>,
}

/// The argument half of a query, independent of the operator name so the
/// same enum covers scalar comparisons, set membership, ranges, pattern
/// text, and the two specialization-only query shapes (fulltext query
/// strings, geo radius searches).
#[derive(Debug, Clone)]
pub enum QueryValue {
    Scalar(TypedValue),
    List(Vec<TypedValue>),
    Range(TypedValue, TypedValue),
    Pattern(String),
    Text(String),
    Geo { lat: f64, long: f64, radius_m: f64 },
    None,
}

impl QueryValue {
    pub fn as_scalar(&self) -> Result<TypedValue> {
        match self {
            QueryValue::Scalar(v) => Ok(v.clone()),
            _ => Err(IndexError::InvalidArgument {
                op: "scalar".into(),
                index: "query value is not a scalar".into(),
            }),
        }
    }

    fn repr(&self) -> String {
        match self {
            QueryValue::Scalar(v) => format!("{v:?}"),
            QueryValue::List(vs) => format!("{vs:?}"),
            QueryValue::Range(a, b) => format!("{a:?}..{b:?}"),
            QueryValue::Pattern(p) => format!("pat:{p}"),
            QueryValue::Text(t) => format!("text:{t}"),
            QueryValue::Geo { lat, long, radius_m } => format!("geo:{lat},{long},{radius_m}"),
            QueryValue::None => "none".into(),
        }
    }
}

/// One element of a specialization's add/remove diff: the tree key, the
/// metadata to store (ignored by the caller for removes), and whether
/// this is an add (`true`) or a remove (`false`).
pub type DiffOp = (TypedValue, Metadata, bool);

/// Capability interface a specialization implements (spec §9: "small
/// interface with capabilities project_update, project_build,
/// valid_operators, translate_query").
pub trait IndexProjection: Send + Sync {
    fn valid_operators(&self) -> &'static [&'static str];

    /// Project one primary-store record's raw value into zero or more
    /// (key, metadata) pairs to add, for the build pipeline's stage A/D
    /// and for a brand-new record's first `handle_record_update`.
    fn project_for_build(&self, spec: &IndexSpec, value: &TypedValue, include: &Metadata) -> Vec<(TypedValue, Metadata)>;

    /// Diff a record's old and new value (and old/new include-key
    /// metadata) into the adds/removes that bring the index in sync.
    fn diff_update(
        &self,
        spec: &IndexSpec,
        old: Option<&TypedValue>,
        new: Option<&TypedValue>,
        include_old: &Metadata,
        include_new: &Metadata,
    ) -> Vec<DiffOp>;

    /// Translate a public query operator + value into tree matches.
    fn execute_query(&self, tree: &BPlusTree, spec: &IndexSpec, op: &str, value: &QueryValue) -> Result<Vec<Match>>;
}

pub fn projection_for(index_type: IndexType) -> Box<dyn IndexProjection> {
    match index_type {
        IndexType::Normal => Box::new(normal::Normal),
        IndexType::Array => Box::new(array::Array),
        IndexType::FullText => Box::new(fulltext::FullText),
        IndexType::Geo => Box::new(geo::Geo),
    }
}

/// One persisted index instance (spec §3): spec + tree + cache + locks.
pub struct Index {
    pub spec: IndexSpec,
    cfg: IndexEngineConfig,
    tree: AsyncRwLock<BPlusTree>,
    cache: QueryCache,
    lock: IndexLock,
    write_metrics: WritePerformanceMonitor,
    projection: Box<dyn IndexProjection>,
}

impl Index {
    pub fn new(spec: IndexSpec, cfg: IndexEngineConfig) -> Self {
        let metadata_count = spec.metadata_keys().len();
        let case_sensitive = spec.case_sensitive;
        let tree = BPlusTree::new_empty(cfg.clone(), metadata_count, case_sensitive);
        let projection = projection_for(spec.index_type);
        Self {
            cache: QueryCache::new(cfg.cache_ttl, cfg.cache_capacity),
            write_metrics: WritePerformanceMonitor::new(Default::default()),
            lock: IndexLock::new(),
            tree: AsyncRwLock::new(tree),
            projection,
            spec,
            cfg,
        }
    }

    pub fn metadata_count(&self) -> usize {
        self.spec.metadata_keys().len()
    }

    pub fn projection(&self) -> &dyn IndexProjection {
        self.projection.as_ref()
    }

    pub fn config(&self) -> &IndexEngineConfig {
        &self.cfg
    }

    /// Replace the live tree wholesale (used by `rebuild` and by the
    /// build pipeline's stage D, which constructs a whole new tree
    /// out-of-band and then swaps it in under the write lock).
    pub async fn replace_tree(&self, tree: BPlusTree) {
        let _file = self.lock.write().await;
        *self.tree.write().await = tree;
        self.cache.clear();
    }

    fn decode_matches(&self, matches: Vec<Match>) -> ResultSet {
        let keys = self.spec.metadata_keys();
        let results = matches
            .into_iter()
            .map(|m| {
                let metadata = keys
                    .iter()
                    .cloned()
                    .zip(m.metadata.iter().cloned())
                    .collect();
                IndexQueryResult { key: m.key, record_pointer: m.record_pointer, metadata }
            })
            .collect();
        ResultSet { results }
    }

    /// `query(op, val) -> ResultSet` (spec §6). Validates the operator
    /// against the specialization's capability list, probes the cache,
    /// acquires a shared lock, and falls back to a tree search on miss.
    pub async fn query(&self, op: &str, value: QueryValue) -> Result<ResultSet> {
        if !self.projection.valid_operators().contains(&op) {
            return Err(IndexError::InvalidArgument {
                op: op.to_string(),
                index: format!("{:?} index at {}", self.spec.index_type, self.spec.path),
            });
        }

        let cache_key = CacheKey::new(op, value.repr());
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }

        let _read = self.lock.read().await;
        let tree = self.tree.read().await;
        let matches = self.projection.execute_query(&tree, &self.spec, op, &value)?;
        let result = self.decode_matches(matches);

        record_metric(MetricType::Counter { name: "index.query.cache_miss", value: 1 });
        self.cache.put(cache_key, result.clone());
        Ok(result)
    }

    pub async fn count(&self, op: &str, value: QueryValue) -> Result<u64> {
        Ok(self.query(op, value).await?.results.len() as u64)
    }

    /// `take(skip, take, ascending)` (spec §6): pagination by ordered
    /// leaf-chain traversal, bypassing the operator cache entirely since
    /// it isn't keyed by (op, value).
    pub async fn take(&self, skip: usize, take: usize, ascending: bool) -> Result<ResultSet> {
        let _read = self.lock.read().await;
        let tree = self.tree.read().await;
        let all = tree.all_matches(ascending)?;
        let page = all.into_iter().skip(skip).take(take).collect();
        Ok(self.decode_matches(page))
    }

    /// Apply one primary-store change notification (spec §6): derive the
    /// diff via the specialization, batch it into a single tree
    /// transaction (removes before adds within the batch, per §5
    /// ordering), and invalidate the cache before releasing the write
    /// lock.
    pub async fn handle_record_update(
        &self,
        event: &ChangeEvent,
        record_pointer: RecordPointer,
        include_old: Metadata,
        include_new: Metadata,
    ) -> Result<()> {
        let start = Instant::now();
        let diff = self.projection.diff_update(
            &self.spec,
            event.old_value.as_ref(),
            event.new_value.as_ref(),
            &include_old,
            &include_new,
        );

        let mut removes = Vec::new();
        let mut adds = Vec::new();
        for (key, metadata, is_add) in diff {
            if is_add {
                adds.push(TreeOp::Add { key, record_pointer: record_pointer.clone(), metadata });
            } else {
                removes.push(TreeOp::Remove { key, record_pointer: record_pointer.clone() });
            }
        }
        removes.extend(adds);
        let ops = removes;
        if ops.is_empty() {
            return Ok(());
        }

        let _file = self.lock.write().await;
        {
            let mut tree = self.tree.write().await;
            tree.transaction(ops)?;
        }
        self.cache.clear();
        self.write_metrics.record_write(start.elapsed()).await;
        record_metric(MetricType::Counter { name: "index.mutation", value: 1 });
        Ok(())
    }

    /// Explicit rebuild (spec §6 `rebuild() -> ()`), outside the
    /// transaction-overflow path.
    pub async fn rebuild(&self) -> Result<()> {
        let _file = self.lock.write().await;
        self.tree.write().await.rebuild();
        self.cache.clear();
        record_metric(MetricType::Counter { name: "index.rebuild", value: 1 });
        Ok(())
    }

    pub async fn entry_count(&self) -> usize {
        self.tree.read().await.entry_count()
    }
}

/// Translate the base comparison/membership operators shared by Normal
/// and (for `exists`/`!exists`) Array into a tree `Operator`. Lives here
/// rather than in `tree::ops` since it is query-string-facing, not
/// tree-internal.
pub(crate) fn translate_basic_operator(op: &str, value: &QueryValue) -> Result<crate::tree::ops::Operator> {
    use crate::tree::ops::Operator;
    let invalid = || IndexError::InvalidArgument { op: op.to_string(), index: "normal/array index".into() };
    Ok(match (op, value) {
        ("==", QueryValue::Scalar(v)) => Operator::Eq(v.clone()),
        ("!=", QueryValue::Scalar(v)) => Operator::Ne(v.clone()),
        ("<", QueryValue::Scalar(v)) => Operator::Lt(v.clone()),
        ("<=", QueryValue::Scalar(v)) => Operator::Lte(v.clone()),
        (">", QueryValue::Scalar(v)) => Operator::Gt(v.clone()),
        (">=", QueryValue::Scalar(v)) => Operator::Gte(v.clone()),
        ("in", QueryValue::List(vs)) => Operator::In(vs.clone()),
        ("!in", QueryValue::List(vs)) => Operator::NotIn(vs.clone()),
        ("between", QueryValue::Range(lo, hi)) => Operator::Between(lo.clone(), hi.clone()),
        ("!between", QueryValue::Range(lo, hi)) => Operator::NotBetween(lo.clone(), hi.clone()),
        ("like", QueryValue::Pattern(p)) => Operator::Like(p.clone()),
        ("!like", QueryValue::Pattern(p)) => Operator::NotLike(p.clone()),
        ("matches", QueryValue::Pattern(p)) => {
            Operator::Matches(regex::Regex::new(p).map_err(|_| invalid())?)
        }
        ("!matches", QueryValue::Pattern(p)) => {
            Operator::NotMatches(regex::Regex::new(p).map_err(|_| invalid())?)
        }
        ("exists", _) => Operator::Exists,
        ("!exists", _) => Operator::NotExists,
        ("contains", QueryValue::Scalar(v)) => Operator::Eq(v.clone()),
        ("!contains", QueryValue::Scalar(v)) => Operator::Ne(v.clone()),
        _ => return Err(invalid()),
    })
}

/// Case-fold a string per the index's locale configuration, used by the
/// fulltext tokenizer and anywhere a specialization needs to normalize a
/// value before encoding it as a key (spec §4.6: "value normalization
/// (case-folding, locale)"). Locale is honored only for case-folding, no
/// collation, per spec §4.2.
pub(crate) fn fold_case(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

#[allow(unused_imports)]
use codec as _codec_reexport_anchor;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordPointer;

    fn spec() -> IndexSpec {
        IndexSpec {
            path: "songs".into(),
            key: "year".into(),
            include_keys: vec!["title".into()],
            case_sensitive: false,
            locale: "en".into(),
            index_type: IndexType::Normal,
        }
    }

    #[tokio::test]
    async fn query_rejects_unsupported_operator_for_type() {
        let index = Index::new(spec(), IndexEngineConfig::default());
        let err = index.query("fulltext:contains", QueryValue::Text("x".into())).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn update_then_query_invalidates_cache() {
        let index = Index::new(spec(), IndexEngineConfig::default());
        let event = ChangeEvent { path: "songs/s1".into(), old_value: None, new_value: Some(TypedValue::Int(1999)) };
        index
            .handle_record_update(
                &event,
                RecordPointer::new(vec![], "s1"),
                vec![],
                vec![TypedValue::String("A".into())],
            )
            .await
            .unwrap();

        let res = index.query("==", QueryValue::Scalar(TypedValue::Int(1999))).await.unwrap();
        assert_eq!(res.results.len(), 1);
        assert_eq!(res.results[0].metadata[0], ("title".to_string(), TypedValue::String("A".into())));
    }
}
