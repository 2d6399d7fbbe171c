// The primary record store is an external collaborator: opaque hierarchical
// storage that the indexing engine reads from (to
// build/enumerate) and receives change notifications from (to update
// incrementally). This module defines only the interface the index and
// pipeline layers consume; no implementation lives in this crate.

use crate::error::Result;
use crate::types::TypedValue;
use async_trait::async_trait;

/// One child node under a path, as yielded by `get_children`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildNode {
    /// The child's key name (object property) or index (array element).
    pub key: String,
    pub value: TypedValue,
}

/// Read-only view onto the primary store, as consumed by the build
/// pipeline's enumeration stage and by incremental index updates.
///
/// Implementations are free to back this however they like (in-memory
/// tree, file-backed store, remote service); the indexing engine only
/// ever calls these two methods and never assumes anything about storage
/// beyond "paths resolve to values, and children can be streamed".
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Stream the children directly beneath `path`, honoring an optional
    /// key filter (used when a wildcard segment's fanout must be capped).
    async fn get_children(&self, path: &str, key_filter: Option<&str>) -> Result<Vec<ChildNode>>;

    /// Fetch a single node's raw value.
    async fn get_value(&self, path: &str) -> Result<TypedValue>;
}

/// A change notification delivered to `Index::handle_record_update`: the
/// old and new value at `path`, from which a specialization re-derives its
/// (key, record-pointer, metadata) projection.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: String,
    pub old_value: Option<TypedValue>,
    pub new_value: Option<TypedValue>,
}
