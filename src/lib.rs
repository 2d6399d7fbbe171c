// BranchIndex - a persistent binary B+ tree secondary-indexing engine for
// schemaless hierarchical stores.
//
// The primary record store, query planner, and public wire protocol are
// out of scope here: this crate owns the on-disk tree format, the index
// envelope, the four index type specializations, the external
// merge-sort build pipeline, and the query cache / locking model that
// sits in front of them.

pub mod cache;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod index;
pub mod io;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod path_utils;
pub mod pipeline;
pub mod primary_store;
pub mod tree;
pub mod types;

pub use cache::{CacheKey, QueryCache};
pub use config::IndexEngineConfig;
pub use envelope::{IndexHeader, TreeDescriptor};
pub use error::{IndexError, Result};
pub use index::{Index, IndexProjection, IndexQueryResult, IndexSpec, IndexType, QueryValue, ResultSet};
pub use lock::{FileLock, IndexLock};
pub use observability::{init_logging, log_operation, record_metric, with_trace_id, MetricType, Operation};
pub use primary_store::{ChangeEvent, ChildNode, PrimaryStore};
pub use tree::{BPlusTree, Match, TreeOp};
pub use types::{Metadata, RecordPointer, TypedValue};
