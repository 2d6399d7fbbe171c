// Tree structural diagnostics: depth, leaf count, average fill, and
// free-space fragmentation, computed from a live tree. Used by the
// maintenance CLI's `inspect` subcommand and by the rebuild-threshold
// decision (a tree whose fragmentation ratio has climbed past a
// watermark is a better rebuild candidate than one judged by entry
// count alone).

use crate::tree::BPlusTree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeStructureMetrics {
    pub depth: usize,
    pub leaf_count: usize,
    pub entry_count: usize,
    pub region_bytes: usize,
    pub free_bytes: u64,
    /// `free_bytes / region_bytes`, 0 when the region is empty.
    pub fragmentation_ratio: f64,
    /// Entries per leaf, averaged across all leaves.
    pub average_fill: f64,
}

pub fn analyze(tree: &BPlusTree) -> TreeStructureMetrics {
    let depth = tree.depth();
    let leaf_count = tree.leaf_count();
    let entry_count = tree.entry_count();
    let region_bytes = tree.region_len();
    let free_bytes = tree.free_space_total();

    let fragmentation_ratio = if region_bytes == 0 { 0.0 } else { free_bytes as f64 / region_bytes as f64 };
    let average_fill = if leaf_count == 0 { 0.0 } else { entry_count as f64 / leaf_count as f64 };

    TreeStructureMetrics { depth, leaf_count, entry_count, region_bytes, free_bytes, fragmentation_ratio, average_fill }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexEngineConfig;
    use crate::types::{RecordPointer, TypedValue};

    #[test]
    fn empty_tree_has_zero_metrics() {
        let tree = BPlusTree::new_empty(IndexEngineConfig::default(), 0, true);
        let m = analyze(&tree);
        assert_eq!(m.entry_count, 0);
        assert_eq!(m.leaf_count, 1);
        assert_eq!(m.fragmentation_ratio, 0.0);
    }

    #[test]
    fn populated_tree_reports_nonzero_fill() {
        let mut cfg = IndexEngineConfig::default();
        cfg.entries_per_node = 4;
        let mut tree = BPlusTree::new_empty(cfg, 0, true);
        for i in 0..20 {
            tree.add(TypedValue::Int(i), RecordPointer::new(vec![], format!("r{i}")), vec![]).unwrap();
        }
        let m = analyze(&tree);
        assert_eq!(m.entry_count, 20);
        assert!(m.leaf_count >= 1);
        assert!(m.average_fill > 0.0);
    }
}
