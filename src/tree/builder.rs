// Bulk tree construction (spec §4.4). Shared by `Tree::rebuild` and stage D
// of the build pipeline. Input is an ordered stream of (key, values),
// already sorted ascending under the §4.2 total order with duplicate keys
// merged.
//
// Routing keys are never stored independently of the child they route to:
// an internal node's entry for child `c` is always `(c.min_key, c.offset)`,
// recomputed fresh every time a child list is assembled. That makes the
// spec's "routing-key rebalance rule" automatic — moving a child between
// parents during the fill-factor rebalance just changes which parent
// computes its routing key from that child, the key itself is always
// re-derived, never copied stale.

use super::fst::FreeSpaceTracker;
use super::node::{write_u48, InternalNode, LeafEntry, LeafNode, NULL_PTR};
use crate::config::IndexEngineConfig;
use crate::types::TypedValue;

#[derive(Clone)]
struct NodeHandle {
    offset: u64,
    min_key: TypedValue,
}

pub struct BuiltTree {
    pub region: Vec<u8>,
    pub root_offset: u64,
    pub fst: FreeSpaceTracker,
}

/// Build a fresh tree region from an ordered, deduplicated entry stream.
pub fn bulk_build(
    entries: Vec<LeafEntry>,
    cfg: &IndexEngineConfig,
    metadata_count: usize,
    fill_factor: f32,
) -> BuiltTree {
    let max_entries = cfg.entries_per_node as usize;
    let per_leaf = ((max_entries as f32 * fill_factor).floor() as usize).max(1);

    let mut region: Vec<u8> = Vec::new();

    if entries.is_empty() {
        let leaf = LeafNode::new_empty();
        let len = leaf.min_content_length();
        let bytes = leaf.serialize(metadata_count, len);
        region.extend_from_slice(&bytes);
        return BuiltTree { region, root_offset: 0, fst: FreeSpaceTracker::new() };
    }

    // --- Leaves: two passes so sibling pointers can reference offsets
    // assigned in pass 1 before the final bytes are written in pass 2.
    let leaf_chunks: Vec<&[LeafEntry]> = entries.chunks(per_leaf).collect();
    let mut offsets = Vec::with_capacity(leaf_chunks.len());
    let mut cursor = 0u64;
    let mut draft_lens = Vec::with_capacity(leaf_chunks.len());
    for chunk in &leaf_chunks {
        let leaf = LeafNode {
            prev: None,
            next: None,
            entries: chunk.to_vec(),
            free_byte_length: 0,
            ext_blocks: Vec::new(),
            ext_free_len: 0,
        };
        let content_len = leaf.min_content_length();
        let slack = (content_len as f32 * cfg.leaf_free_fraction) as u32;
        let byte_length = content_len + slack;
        offsets.push(cursor);
        draft_lens.push(byte_length);
        cursor += byte_length as u64;
    }

    let mut handles = Vec::with_capacity(leaf_chunks.len());
    for (i, chunk) in leaf_chunks.iter().enumerate() {
        let prev = if i == 0 { None } else { Some(offsets[i - 1]) };
        let next = if i + 1 < offsets.len() { Some(offsets[i + 1]) } else { None };
        let mut leaf = LeafNode {
            prev,
            next,
            entries: chunk.to_vec(),
            free_byte_length: 0,
            ext_blocks: Vec::new(),
            ext_free_len: 0,
        };
        leaf.free_byte_length = draft_lens[i] - leaf.min_content_length();
        let bytes = leaf.serialize(metadata_count, draft_lens[i]);
        debug_assert_eq!(bytes.len() as u64, draft_lens[i] as u64);
        region.extend_from_slice(&bytes);
        handles.push(NodeHandle { offset: offsets[i], min_key: chunk[0].key.clone() });
    }

    // --- Internal levels, bottom-up, until one handle (the root) remains.
    while handles.len() > 1 {
        let groups = group_children(&handles, max_entries);
        let mut next_level = Vec::with_capacity(groups.len());
        for group in groups {
            let routing: Vec<(TypedValue, u64)> = (1..group.len())
                .map(|i| (group[i].min_key.clone(), group[i - 1].offset))
                .collect();
            let node = InternalNode { entries: routing, gt_child: group.last().unwrap().offset };
            let len = node.min_content_length();
            let offset = region.len() as u64;
            let bytes = node.serialize(len);
            region.extend_from_slice(&bytes);
            next_level.push(NodeHandle { offset, min_key: group[0].min_key.clone() });
        }
        handles = next_level;
    }

    BuiltTree { region, root_offset: handles[0].offset, fst: FreeSpaceTracker::new() }
}

/// Group children into parents of up to `max_entries + 1` each, then apply
/// the fill-factor rebalance: if the last group is under-filled (fewer
/// than `floor(max_entries/2) + 1` children) and there is a previous
/// group to borrow from, merge the last two groups and re-split them
/// evenly.
fn group_children(children: &[NodeHandle], max_entries: usize) -> Vec<Vec<NodeHandle>> {
    let group_size = max_entries + 1;
    let min_children = max_entries / 2 + 1;

    let mut groups: Vec<Vec<NodeHandle>> =
        children.chunks(group_size).map(|c| c.to_vec()).collect();

    if groups.len() > 1 {
        let last_len = groups.last().unwrap().len();
        if last_len < min_children {
            let last = groups.pop().unwrap();
            let prev = groups.pop().unwrap();
            let mut combined = prev;
            combined.extend(last);
            let half = combined.len().div_ceil(2);
            let (a, b) = combined.split_at(half.min(combined.len()));
            groups.push(a.to_vec());
            if !b.is_empty() {
                groups.push(b.to_vec());
            }
        }
    }
    groups
}

/// Patch a 48-bit pointer field embedded at `at` inside `region`.
pub fn patch_u48(region: &mut [u8], at: usize, value: u64) {
    let mut tmp = Vec::with_capacity(6);
    write_u48(&mut tmp, value);
    region[at..at + 6].copy_from_slice(&tmp);
}

pub const NULL_OFFSET: u64 = NULL_PTR;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::{LeafEntry, ValueEntry};
    use crate::types::RecordPointer;

    fn entry(k: i64) -> LeafEntry {
        LeafEntry {
            key: TypedValue::Int(k),
            values: vec![ValueEntry {
                record_pointer: RecordPointer::new(vec![], format!("r{k}")),
                metadata: vec![],
            }],
        }
    }

    #[test]
    fn bulk_build_empty_produces_single_empty_leaf() {
        let cfg = IndexEngineConfig::default();
        let built = bulk_build(vec![], &cfg, 0, cfg.bulk_fill_factor);
        let (leaf, _) = LeafNode::parse(&built.region, 0).unwrap();
        assert!(leaf.entries.is_empty());
        assert_eq!(built.root_offset, 0);
    }

    #[test]
    fn bulk_build_many_entries_produces_navigable_tree() {
        let mut cfg = IndexEngineConfig::default();
        cfg.entries_per_node = 4;
        let entries: Vec<LeafEntry> = (0..50).map(entry).collect();
        let built = bulk_build(entries.clone(), &cfg, 0, 1.0);

        // Walk the leaf chain from the leftmost leaf and confirm ascending,
        // complete coverage.
        let mut offset = built.root_offset;
        // descend to leftmost leaf
        loop {
            let (len, is_leaf) = crate::tree::node::peek_header(&built.region[offset as usize..]).unwrap();
            let node_bytes = &built.region[offset as usize..offset as usize + len as usize];
            if is_leaf {
                break;
            }
            let (internal, _) = InternalNode::parse(node_bytes).unwrap();
            offset = internal.entries.first().map(|(_, c)| *c).unwrap_or(internal.gt_child);
        }

        let mut collected = Vec::new();
        loop {
            let (len, _) = crate::tree::node::peek_header(&built.region[offset as usize..]).unwrap();
            let node_bytes = &built.region[offset as usize..offset as usize + len as usize];
            let (leaf, _) = LeafNode::parse(node_bytes, 0).unwrap();
            for e in &leaf.entries {
                collected.push(e.key.clone());
            }
            match leaf.next {
                Some(n) => offset = n,
                None => break,
            }
        }
        assert_eq!(collected.len(), 50);
        for w in collected.windows(2) {
            assert_eq!(
                crate::types::compare_keys(&w[0], &w[1], true),
                std::cmp::Ordering::Less
            );
        }
    }
}
