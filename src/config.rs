// Engine-wide configuration, in the style of the teacher's `DatabaseConfig`
// (src/contracts/mod.rs): one struct with sane defaults, constructed once
// and threaded through index/tree/pipeline construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a single index's tree, cache, and build pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEngineConfig {
    /// Max entries per node (hardcoded format ceiling is 255; this is the
    /// operating point below that ceiling).
    pub entries_per_node: u8,
    /// Fill factor used when rebuilding a tree from scratch (§4.3: ~50%
    /// default for rebuild, 95% for the in-memory bulk builder).
    pub rebuild_fill_factor: f32,
    pub bulk_fill_factor: f32,
    /// Fraction of a node's payload (leaf or internal) reserved as
    /// free-space tail so small edits do not require relocation
    /// (§4.3: ≈10%).
    pub leaf_free_fraction: f32,
    /// Query cache entry TTL (§4.8 default 60s).
    pub cache_ttl: Duration,
    /// Max cached (op, value) entries per index.
    pub cache_capacity: usize,
    /// Stage A wildcard fanout base (§4.5: `round(500^(0.5^wildcards))`).
    pub enumerate_fanout_base: f64,
    /// Stage B in-memory batch size before a run file is spilled (§4.5).
    pub max_values_per_batch: usize,
    /// Reader chunk-buffer size (§4.1 default 512 KiB).
    pub reader_chunk_size: usize,
    /// Whether to fsync at transaction/rebuild commit (§9 open question:
    /// source does not; we add it for durability as the spec suggests).
    pub fsync_on_commit: bool,
}

impl Default for IndexEngineConfig {
    fn default() -> Self {
        Self {
            entries_per_node: 255,
            rebuild_fill_factor: 0.50,
            bulk_fill_factor: 0.95,
            leaf_free_fraction: 0.10,
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 256,
            enumerate_fanout_base: 500.0,
            max_values_per_batch: 100_000,
            reader_chunk_size: 512 * 1024,
            fsync_on_commit: true,
        }
    }
}

impl IndexEngineConfig {
    pub fn max_batch_for_wildcards(&self, wildcards: u32) -> usize {
        let exp = 0.5f64.powi(wildcards as i32);
        self.enumerate_fanout_base.powf(exp).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_shrinks_with_wildcard_depth() {
        let cfg = IndexEngineConfig::default();
        let zero = cfg.max_batch_for_wildcards(0);
        let one = cfg.max_batch_for_wildcards(1);
        let two = cfg.max_batch_for_wildcards(2);
        assert_eq!(zero, 500);
        assert!(one < zero);
        assert!(two < one);
    }
}
