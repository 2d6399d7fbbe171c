// In-memory/on-disk binary tree (spec §4.3): the engine's per-index
// B+ tree over a single `region` byte buffer, with node offsets relative
// to the region's own start. Persistence to a real file happens by
// writing/reading the whole region through an `io::WriteSink`/`ReadSource`
// (see `Tree::load`/`Tree::persist`); the teacher's own `primary_index.rs`
// takes the same "materialize the live tree in memory, persist wholesale"
// shape, just over a JSON dictionary instead of packed bytes.

pub mod builder;
pub mod fst;
pub mod node;
pub mod ops;

use self::builder::{bulk_build, patch_u48};
use self::fst::FreeSpaceTracker;
use self::node::{
    peek_header, write_u48, InternalNode, LeafEntry, LeafNode, ValueEntry, NULL_PTR,
};
use self::ops::Operator;
use crate::config::IndexEngineConfig;
use crate::error::{IndexError, Result};
use crate::io::WriteSink;
use crate::types::{compare_keys, Metadata, RecordPointer, TypedValue};

/// A single matched value, with the key it was found under (needed by
/// callers that group results, e.g. the fulltext specialization's
/// per-term result sets).
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub key: TypedValue,
    pub record_pointer: RecordPointer,
    pub metadata: Metadata,
}

/// One mutation to apply inside `Tree::transaction`.
pub enum TreeOp {
    Add { key: TypedValue, record_pointer: RecordPointer, metadata: Metadata },
    Remove { key: TypedValue, record_pointer: RecordPointer },
    Update {
        key: TypedValue,
        record_pointer: RecordPointer,
        old_record_pointer: RecordPointer,
        metadata: Metadata,
    },
}

/// The ceiling on any 48-bit node offset (spec §4.1): one past the largest
/// value `NULL_PTR` doesn't already claim as "no sibling".
const MAX_OFFSET: u64 = NULL_PTR - 1;

pub struct BPlusTree {
    cfg: IndexEngineConfig,
    metadata_count: usize,
    case_sensitive: bool,
    region: Vec<u8>,
    root_offset: u64,
    fst: FreeSpaceTracker,
}

impl BPlusTree {
    /// Build a brand-new, empty tree.
    pub fn new_empty(cfg: IndexEngineConfig, metadata_count: usize, case_sensitive: bool) -> Self {
        let built = bulk_build(Vec::new(), &cfg, metadata_count, cfg.bulk_fill_factor);
        Self {
            cfg,
            metadata_count,
            case_sensitive,
            region: built.region,
            root_offset: built.root_offset,
            fst: built.fst,
        }
    }

    /// Build a tree directly from an ordered, deduplicated entry stream
    /// (used by the pipeline's stage D and by `rebuild`).
    pub fn from_sorted_entries(
        entries: Vec<LeafEntry>,
        cfg: IndexEngineConfig,
        metadata_count: usize,
        case_sensitive: bool,
        fill_factor: f32,
    ) -> Self {
        let built = bulk_build(entries, &cfg, metadata_count, fill_factor);
        Self {
            cfg,
            metadata_count,
            case_sensitive,
            region: built.region,
            root_offset: built.root_offset,
            fst: built.fst,
        }
    }

    /// Load a tree back from a previously persisted region (whole-region
    /// read; the FST is rebuilt by walking gaps between the root and leaf
    /// chain is not recoverable from bytes alone, so a freshly loaded tree
    /// starts with an empty FST — growth falls back to append-grow until
    /// the next rebuild repacks it.
    pub fn load(
        region: Vec<u8>,
        root_offset: u64,
        cfg: IndexEngineConfig,
        metadata_count: usize,
        case_sensitive: bool,
    ) -> Self {
        Self { cfg, metadata_count, case_sensitive, region, root_offset, fst: FreeSpaceTracker::new() }
    }

    /// Persist the whole region to a sink, returning the offset at which
    /// the region begins (so the caller can record `root_offset` relative
    /// to that position in the envelope's per-tree descriptor).
    pub async fn persist(&self, sink: &mut dyn WriteSink) -> Result<u64> {
        let base = sink.append(&self.region).await?;
        if self.cfg.fsync_on_commit {
            sink.flush().await?;
        }
        Ok(base)
    }

    pub fn root_offset(&self) -> u64 {
        self.root_offset
    }

    pub fn region(&self) -> &[u8] {
        &self.region
    }

    fn load_leaf(&self, offset: u64) -> Result<LeafNode> {
        let bytes = self.region.get(offset as usize..).ok_or(IndexError::Eof)?;
        Ok(LeafNode::parse(bytes, self.metadata_count)?.0)
    }

    fn load_internal(&self, offset: u64) -> Result<InternalNode> {
        let bytes = self.region.get(offset as usize..).ok_or(IndexError::Eof)?;
        Ok(InternalNode::parse(bytes)?.0)
    }

    fn is_leaf(&self, offset: u64) -> Result<bool> {
        let bytes = self.region.get(offset as usize..).ok_or(IndexError::Eof)?;
        Ok(peek_header(bytes)?.1)
    }

    /// Descend from the root to the leaf that would contain `key`,
    /// returning the path of internal-node offsets walked (root first)
    /// alongside the leaf offset, so callers can retrace the path to
    /// insert a routing key after a split.
    fn descend(&self, key: &TypedValue) -> Result<(Vec<u64>, u64)> {
        let mut path = Vec::new();
        let mut offset = self.root_offset;
        while !self.is_leaf(offset)? {
            path.push(offset);
            let node = self.load_internal(offset)?;
            let mut next = node.gt_child;
            for (routing_key, lt_child) in &node.entries {
                if compare_keys(key, routing_key, self.case_sensitive) == std::cmp::Ordering::Less {
                    next = *lt_child;
                    break;
                }
            }
            offset = next;
        }
        Ok((path, offset))
    }

    /// `find(key)`: all values stored under an exact key match.
    pub fn find(&self, key: &TypedValue) -> Result<Vec<Match>> {
        let (_, leaf_offset) = self.descend(key)?;
        let leaf = self.load_leaf(leaf_offset)?;
        Ok(leaf
            .entries
            .iter()
            .find(|e| compare_keys(&e.key, key, self.case_sensitive) == std::cmp::Ordering::Equal)
            .map(|e| {
                e.values
                    .iter()
                    .map(|v| Match {
                        key: e.key.clone(),
                        record_pointer: v.record_pointer.clone(),
                        metadata: v.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// `search(op, include)`: range operators seek to one leaf and walk the
    /// chain until the range's high bound is passed; every other operator
    /// walks the whole chain and filters.
    pub fn search(&self, op: &Operator) -> Result<Vec<Match>> {
        let mut out = Vec::new();
        if op.is_range() {
            // `<`/`<=` have no lower bound to seek to; every other range
            // operator can jump straight to the leaf that would contain
            // its lower bound.
            let seek_key = match op {
                Operator::Eq(k) | Operator::Gt(k) | Operator::Gte(k) => Some(k.clone()),
                Operator::Between(lo, _) => Some(lo.clone()),
                Operator::Lt(_) | Operator::Lte(_) => None,
                _ => None,
            };
            let mut offset = match &seek_key {
                Some(k) => self.descend(k)?.1,
                None => self.leftmost_leaf()?,
            };
            loop {
                let leaf = self.load_leaf(offset)?;
                let mut stop = false;
                for entry in &leaf.entries {
                    let keep = self.matches_range(op, &entry.key);
                    if self.past_upper_bound(op, &entry.key) {
                        stop = true;
                        break;
                    }
                    if keep {
                        out.extend(entry.values.iter().map(|v| Match {
                            key: entry.key.clone(),
                            record_pointer: v.record_pointer.clone(),
                            metadata: v.metadata.clone(),
                        }));
                    }
                }
                if stop {
                    break;
                }
                match leaf.next {
                    Some(n) => offset = n,
                    None => break,
                }
            }
        } else {
            let mut offset = self.leftmost_leaf()?;
            loop {
                let leaf = self.load_leaf(offset)?;
                for entry in &leaf.entries {
                    if self.matches_scan(op, &entry.key) {
                        out.extend(entry.values.iter().map(|v| Match {
                            key: entry.key.clone(),
                            record_pointer: v.record_pointer.clone(),
                            metadata: v.metadata.clone(),
                        }));
                    }
                }
                match leaf.next {
                    Some(n) => offset = n,
                    None => break,
                }
            }
        }
        Ok(out)
    }

    fn leftmost_leaf(&self) -> Result<u64> {
        let mut offset = self.root_offset;
        while !self.is_leaf(offset)? {
            let node = self.load_internal(offset)?;
            offset = node.entries.first().map(|(_, c)| *c).unwrap_or(node.gt_child);
        }
        Ok(offset)
    }

    fn matches_range(&self, op: &Operator, k: &TypedValue) -> bool {
        use std::cmp::Ordering::*;
        match op {
            Operator::Eq(v) => compare_keys(k, v, self.case_sensitive) == Equal,
            Operator::Lt(v) => compare_keys(k, v, self.case_sensitive) == Less,
            Operator::Lte(v) => compare_keys(k, v, self.case_sensitive) != Greater,
            Operator::Gt(v) => compare_keys(k, v, self.case_sensitive) == Greater,
            Operator::Gte(v) => compare_keys(k, v, self.case_sensitive) != Less,
            Operator::Between(lo, hi) => {
                compare_keys(k, lo, self.case_sensitive) != Less
                    && compare_keys(k, hi, self.case_sensitive) != Greater
            }
            _ => false,
        }
    }

    /// Whether scanning can stop once it reaches `k` (ascending chain, so
    /// every later entry would also fail `matches_range`).
    fn past_upper_bound(&self, op: &Operator, k: &TypedValue) -> bool {
        use std::cmp::Ordering::*;
        match op {
            Operator::Eq(v) => compare_keys(k, v, self.case_sensitive) == Greater,
            Operator::Lt(v) => compare_keys(k, v, self.case_sensitive) != Less,
            Operator::Lte(v) => compare_keys(k, v, self.case_sensitive) == Greater,
            Operator::Between(_, hi) => compare_keys(k, hi, self.case_sensitive) == Greater,
            // `>`/`>=` have no upper bound; scan to the end of the chain.
            Operator::Gt(_) | Operator::Gte(_) => false,
            _ => false,
        }
    }

    fn matches_scan(&self, op: &Operator, k: &TypedValue) -> bool {
        use std::cmp::Ordering::*;
        match op {
            Operator::Ne(v) => compare_keys(k, v, self.case_sensitive) != Equal,
            Operator::In(vs) => vs.iter().any(|v| compare_keys(k, v, self.case_sensitive) == Equal),
            Operator::NotIn(vs) => !vs.iter().any(|v| compare_keys(k, v, self.case_sensitive) == Equal),
            Operator::NotBetween(lo, hi) => {
                compare_keys(k, lo, self.case_sensitive) == Less
                    || compare_keys(k, hi, self.case_sensitive) == Greater
            }
            Operator::Like(pat) => {
                k.as_str().map(|s| ops::glob_match(pat, s, self.case_sensitive)).unwrap_or(false)
            }
            Operator::NotLike(pat) => {
                !k.as_str().map(|s| ops::glob_match(pat, s, self.case_sensitive)).unwrap_or(false)
            }
            Operator::Matches(re) => k.as_str().map(|s| re.is_match(s)).unwrap_or(false),
            Operator::NotMatches(re) => !k.as_str().map(|s| re.is_match(s)).unwrap_or(false),
            Operator::Exists => !matches!(k, TypedValue::Undefined),
            Operator::NotExists => matches!(k, TypedValue::Undefined),
            _ => false,
        }
    }

    /// `add(key, record_pointer, metadata)`: insert into the owning leaf,
    /// splitting (and cascading the new routing key upward, possibly
    /// growing a new root) on overflow. Returns `TreeFull` if the leaf's
    /// free tail is exhausted and no growth extent is available within
    /// the 48-bit offset ceiling — the caller (`transaction`) handles that
    /// by rebuilding.
    pub fn add(&mut self, key: TypedValue, record_pointer: RecordPointer, metadata: Metadata) -> Result<()> {
        let (path, leaf_offset) = self.descend(&key)?;
        let mut leaf = self.load_leaf(leaf_offset)?;

        let value = ValueEntry { record_pointer, metadata };
        match leaf.entries.iter_mut().find(|e| compare_keys(&e.key, &key, self.case_sensitive) == std::cmp::Ordering::Equal) {
            Some(entry) => entry.values.push(value),
            None => {
                let pos = leaf
                    .entries
                    .partition_point(|e| compare_keys(&e.key, &key, self.case_sensitive) == std::cmp::Ordering::Less);
                leaf.entries.insert(pos, LeafEntry { key: key.clone(), values: vec![value] });
            }
        }

        if leaf.entries.len() > self.cfg.entries_per_node as usize {
            self.split_leaf(path, leaf_offset, leaf)
        } else {
            self.rewrite_leaf_in_place(leaf_offset, &leaf)
        }
    }

    /// Rewrite a leaf that still fits within its reserved byte_length,
    /// reusing the same offset. If it no longer fits, relocate into a
    /// free extent (or append-grow the region) and patch the parent's
    /// pointer (or root_offset, or the previous leaf's `next`).
    fn rewrite_leaf_in_place(&mut self, offset: u64, leaf: &LeafNode) -> Result<()> {
        let (old_len, _) = peek_header(&self.region[offset as usize..])?;
        let min_len = leaf.min_content_length();
        if min_len <= old_len {
            let bytes = leaf.serialize(self.metadata_count, old_len);
            self.region[offset as usize..offset as usize + old_len as usize].copy_from_slice(&bytes);
            return Ok(());
        }
        self.relocate_leaf(offset, leaf, old_len)
    }

    fn relocate_leaf(&mut self, old_offset: u64, leaf: &LeafNode, old_len: u32) -> Result<()> {
        let min_len = leaf.min_content_length();
        let slack = (min_len as f32 * self.cfg.leaf_free_fraction) as u32;
        let new_len = min_len + slack;

        let new_offset = self.alloc_extent(new_len as u64)?;
        let bytes = leaf.serialize(self.metadata_count, new_len);
        if new_offset as usize + bytes.len() > self.region.len() {
            self.region.resize(new_offset as usize + bytes.len(), 0);
        }
        self.region[new_offset as usize..new_offset as usize + bytes.len()].copy_from_slice(&bytes);
        self.fst.release(old_offset, old_len as u64);

        if let Some(prev) = leaf.prev {
            self.patch_sibling_pointer(prev, old_offset, new_offset, true)?;
        }
        if let Some(next) = leaf.next {
            self.patch_sibling_pointer(next, old_offset, new_offset, false)?;
        }
        if self.root_offset == old_offset {
            self.root_offset = new_offset;
        } else {
            self.retarget_parent_child(old_offset, new_offset)?;
        }
        Ok(())
    }

    /// Patch the `prev`/`next` field of the leaf at `sibling_offset` that
    /// currently points at `old_offset` to point at `new_offset` instead.
    fn patch_sibling_pointer(
        &mut self,
        sibling_offset: u64,
        old_offset: u64,
        new_offset: u64,
        patch_next: bool,
    ) -> Result<()> {
        let mut leaf = self.load_leaf(sibling_offset)?;
        let field = if patch_next { &mut leaf.next } else { &mut leaf.prev };
        if *field == Some(old_offset) {
            *field = Some(new_offset);
        }
        let (len, _) = peek_header(&self.region[sibling_offset as usize..])?;
        let bytes = leaf.serialize(self.metadata_count, len);
        self.region[sibling_offset as usize..sibling_offset as usize + len as usize].copy_from_slice(&bytes);
        Ok(())
    }

    /// Find whichever internal node points at `old_child_offset` and
    /// retarget it to `new_child_offset`. Searches every internal node
    /// (a plain DFS over the small internal-node layer) rather than
    /// descending by key, since the relocated child may be an emptied
    /// leaf with no key to seek by.
    fn retarget_parent_child(&mut self, old_child_offset: u64, new_child_offset: u64) -> Result<()> {
        let mut stack = vec![self.root_offset];
        while let Some(offset) = stack.pop() {
            if self.is_leaf(offset)? {
                continue;
            }
            let node = self.load_internal(offset)?;
            if let Some(i) = node.entries.iter().position(|(_, c)| *c == old_child_offset) {
                let field_offset = self.internal_child_field_offset(offset, i)?;
                patch_u48(&mut self.region, field_offset, new_child_offset);
                return Ok(());
            }
            if node.gt_child == old_child_offset {
                let field_offset = self.internal_gt_child_field_offset(offset, node.entries.len())?;
                patch_u48(&mut self.region, field_offset, new_child_offset);
                return Ok(());
            }
            stack.extend(node.entries.iter().map(|(_, c)| *c));
            stack.push(node.gt_child);
        }
        Err(IndexError::NotFound("parent pointer to relocate".into()))
    }

    /// Byte offset, within `self.region`, of the 6-byte child pointer for
    /// routing entry `idx` inside the internal node at `node_offset`.
    fn internal_child_field_offset(&self, node_offset: u64, idx: usize) -> Result<usize> {
        let node = self.load_internal(node_offset)?;
        let mut pos = node_offset as usize + 5 + 1; // byte_length(4)+flags(1)+count(1)
        for (i, (key, _)) in node.entries.iter().enumerate() {
            let mut kb = Vec::new();
            crate::codec::encode_value(key, &mut kb);
            pos += kb.len();
            if i == idx {
                return Ok(pos);
            }
            pos += 6;
        }
        Err(IndexError::NotFound("routing entry".into()))
    }

    fn internal_gt_child_field_offset(&self, node_offset: u64, entry_count: usize) -> Result<usize> {
        let node = self.load_internal(node_offset)?;
        let mut pos = node_offset as usize + 5 + 1;
        for (key, _) in node.entries.iter().take(entry_count) {
            let mut kb = Vec::new();
            crate::codec::encode_value(key, &mut kb);
            pos += kb.len() + 6;
        }
        Ok(pos)
    }

    /// Allocate `len` bytes: best-fit from the free-space tracker, or
    /// append-grow the region. Enforces the 48-bit offset ceiling.
    fn alloc_extent(&mut self, len: u64) -> Result<u64> {
        if let Some((offset, extent_len)) = self.fst.claim(len) {
            if extent_len > len {
                self.fst.release(offset + len, extent_len - len);
            }
            return Ok(offset);
        }
        let offset = self.region.len() as u64;
        if offset + len > MAX_OFFSET {
            return Err(IndexError::TreeFull);
        }
        Ok(offset)
    }

    /// Split an overflowing leaf in two, write both halves into fresh
    /// extents, relink the chain, and insert the new routing key into the
    /// parent (splitting parents up to and including a new root, per
    /// spec §4.3).
    fn split_leaf(&mut self, mut path: Vec<u64>, old_offset: u64, leaf: LeafNode) -> Result<()> {
        let mid = leaf.entries.len() / 2;
        let (left_entries, right_entries) = leaf.entries.split_at(mid);
        let left_entries = left_entries.to_vec();
        let right_entries = right_entries.to_vec();
        let routing_key = right_entries[0].key.clone();

        let right_offset = self.alloc_node_slot(&LeafNode {
            prev: None,
            next: leaf.next,
            entries: right_entries.clone(),
            free_byte_length: 0,
            ext_blocks: Vec::new(),
            ext_free_len: 0,
        })?;

        let left = LeafNode {
            prev: leaf.prev,
            next: Some(right_offset),
            entries: left_entries,
            free_byte_length: 0,
            ext_blocks: Vec::new(),
            ext_free_len: 0,
        };
        let right = LeafNode {
            prev: Some(old_offset),
            next: leaf.next,
            entries: right_entries,
            free_byte_length: 0,
            ext_blocks: Vec::new(),
            ext_free_len: 0,
        };
        self.write_leaf_fresh(old_offset, &left)?;
        self.write_leaf_at(right_offset, &right)?;

        // the leaf after `right` must point its `prev` at `right_offset`
        // instead of the old (now left-half) offset.
        if let Some(next_offset) = leaf.next {
            let mut following = self.load_leaf(next_offset)?;
            if following.prev == Some(old_offset) {
                following.prev = Some(right_offset);
                let (len, _) = peek_header(&self.region[next_offset as usize..])?;
                let bytes = following.serialize(self.metadata_count, len);
                self.region[next_offset as usize..next_offset as usize + len as usize]
                    .copy_from_slice(&bytes);
            }
        }

        self.insert_routing_key(&mut path, old_offset, routing_key, right_offset)
    }

    /// Allocate a slot sized for `leaf`'s content plus configured free
    /// slack, and append it past the current region end (used for the
    /// brand-new right half of a split, which has no prior home).
    fn alloc_node_slot(&mut self, leaf: &LeafNode) -> Result<u64> {
        let min_len = leaf.min_content_length();
        let slack = (min_len as f32 * self.cfg.leaf_free_fraction) as u32;
        self.alloc_extent((min_len + slack) as u64)
    }

    fn write_leaf_at(&mut self, offset: u64, leaf: &LeafNode) -> Result<()> {
        let min_len = leaf.min_content_length();
        let slack = (min_len as f32 * self.cfg.leaf_free_fraction) as u32;
        let len = min_len + slack;
        let bytes = leaf.serialize(self.metadata_count, len);
        if offset as usize + bytes.len() > self.region.len() {
            self.region.resize(offset as usize + bytes.len(), 0);
        }
        self.region[offset as usize..offset as usize + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    /// Rewrite the left half of a split back at its original offset. The
    /// left half is guaranteed smaller than the pre-split leaf so it
    /// always fits the old reservation; if it happens to need more room
    /// (unlikely, but possible with an unbalanced split) it falls back to
    /// relocation.
    fn write_leaf_fresh(&mut self, offset: u64, leaf: &LeafNode) -> Result<()> {
        let (old_len, _) = peek_header(&self.region[offset as usize..])?;
        let min_len = leaf.min_content_length();
        if min_len <= old_len {
            let bytes = leaf.serialize(self.metadata_count, old_len);
            self.region[offset as usize..offset as usize + old_len as usize].copy_from_slice(&bytes);
            Ok(())
        } else {
            self.relocate_leaf(offset, leaf, old_len)
        }
    }

    /// Allocate a fresh extent for an internal node, with the same
    /// reserved free tail leaves get, so a routing-key insertion right
    /// after creation does not immediately force a relocation.
    fn alloc_internal_slot(&mut self, node: &InternalNode) -> Result<u64> {
        let min_len = node.min_content_length();
        let slack = (min_len as f32 * self.cfg.leaf_free_fraction) as u32;
        self.alloc_extent((min_len + slack) as u64)
    }

    fn write_internal_at(&mut self, offset: u64, node: &InternalNode) -> Result<()> {
        let min_len = node.min_content_length();
        let slack = (min_len as f32 * self.cfg.leaf_free_fraction) as u32;
        let len = min_len + slack;
        let bytes = node.serialize(len);
        if offset as usize + bytes.len() > self.region.len() {
            self.region.resize(offset as usize + bytes.len(), 0);
        }
        self.region[offset as usize..offset as usize + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    /// Rewrite an internal node back at its original offset if it still
    /// fits the existing reservation (like `write_leaf_fresh`); otherwise
    /// relocate it, since internal nodes are serialized with no spare
    /// capacity beyond their own reservation and writing more bytes than
    /// that in place would overrun whatever follows in `region`.
    fn write_internal_fresh(&mut self, offset: u64, node: &InternalNode) -> Result<()> {
        let (old_len, _) = peek_header(&self.region[offset as usize..])?;
        let min_len = node.min_content_length();
        if min_len <= old_len {
            let bytes = node.serialize(old_len);
            self.region[offset as usize..offset as usize + old_len as usize].copy_from_slice(&bytes);
            Ok(())
        } else {
            self.relocate_internal(offset, node, old_len)
        }
    }

    /// Move an internal node to a fresh, larger extent and repatch
    /// whichever parent entry (or `root_offset`) points at its old
    /// location, mirroring `relocate_leaf` minus the sibling-chain patch
    /// (internal nodes have no `prev`/`next`).
    fn relocate_internal(&mut self, old_offset: u64, node: &InternalNode, old_len: u32) -> Result<()> {
        let min_len = node.min_content_length();
        let slack = (min_len as f32 * self.cfg.leaf_free_fraction) as u32;
        let new_len = min_len + slack;

        let new_offset = self.alloc_extent(new_len as u64)?;
        let bytes = node.serialize(new_len);
        if new_offset as usize + bytes.len() > self.region.len() {
            self.region.resize(new_offset as usize + bytes.len(), 0);
        }
        self.region[new_offset as usize..new_offset as usize + bytes.len()].copy_from_slice(&bytes);
        self.fst.release(old_offset, old_len as u64);

        if self.root_offset == old_offset {
            self.root_offset = new_offset;
        } else {
            self.retarget_parent_child(old_offset, new_offset)?;
        }
        Ok(())
    }

    /// Insert `(routing_key, old_offset)` into the nearest ancestor on
    /// `path` (last element, i.e. the immediate parent), cascading a
    /// parent split upward if that overflows, and growing a new root if
    /// the root itself splits.
    fn insert_routing_key(
        &mut self,
        path: &mut Vec<u64>,
        left_child: u64,
        routing_key: TypedValue,
        right_child: u64,
    ) -> Result<()> {
        let Some(parent_offset) = path.pop() else {
            // the leaf that split was the root; grow a new internal root
            let new_root = InternalNode { entries: vec![(routing_key, left_child)], gt_child: right_child };
            let offset = self.alloc_internal_slot(&new_root)?;
            self.write_internal_at(offset, &new_root)?;
            self.root_offset = offset;
            return Ok(());
        };

        let mut parent = self.load_internal(parent_offset)?;
        let pos = parent
            .entries
            .partition_point(|(k, _)| compare_keys(k, &routing_key, self.case_sensitive) == std::cmp::Ordering::Less);
        if pos == parent.entries.len() {
            // left_child was the gt_child, handling everything above the
            // last routing key; right_child takes over that role and
            // left_child's range is capped at routing_key.
            parent.gt_child = right_child;
            parent.entries.push((routing_key, left_child));
        } else {
            // left_child was entries[pos], handling everything below
            // entries[pos].0; right_child takes over the upper half of
            // that range, so the slot that used to route to left_child
            // must now route to right_child.
            parent.entries.insert(pos, (routing_key, left_child));
            parent.entries[pos + 1].1 = right_child;
        }

        if parent.entries.len() > self.cfg.entries_per_node as usize {
            self.split_internal(path.clone(), parent_offset, parent)
        } else {
            self.write_internal_fresh(parent_offset, &parent)
        }
    }

    fn split_internal(&mut self, mut path: Vec<u64>, old_offset: u64, node: InternalNode) -> Result<()> {
        let mid = node.entries.len() / 2;
        let routing_key = node.entries[mid].0.clone();
        let left_entries = node.entries[..mid].to_vec();
        let left_gt = node.entries[mid].1;
        let right_entries = node.entries[mid + 1..].to_vec();

        let left = InternalNode { entries: left_entries, gt_child: left_gt };
        let right = InternalNode { entries: right_entries, gt_child: node.gt_child };

        self.write_internal_fresh(old_offset, &left)?;

        let right_offset = self.alloc_internal_slot(&right)?;
        self.write_internal_at(right_offset, &right)?;

        self.insert_routing_key(&mut path, old_offset, routing_key, right_offset)
    }

    /// `remove(key, record_pointer)`: drop the one matching value entry
    /// from its leaf. Underfull leaves are left as-is (spec §9: reclaimed
    /// only by the next rebuild, not merged in place).
    pub fn remove(&mut self, key: &TypedValue, record_pointer: &RecordPointer) -> Result<()> {
        let (_, leaf_offset) = self.descend(key)?;
        let mut leaf = self.load_leaf(leaf_offset)?;
        let Some(entry) = leaf.entries.iter_mut().find(|e| compare_keys(&e.key, key, self.case_sensitive) == std::cmp::Ordering::Equal) else {
            return Err(IndexError::NotFound(format!("key {key:?}")));
        };
        let before = entry.values.len();
        entry.values.retain(|v| v.record_pointer != *record_pointer);
        if entry.values.len() == before {
            return Err(IndexError::NotFound("record_pointer".into()));
        }
        if entry.values.is_empty() {
            leaf.entries.retain(|e| compare_keys(&e.key, key, self.case_sensitive) != std::cmp::Ordering::Equal);
        }
        self.rewrite_leaf_in_place(leaf_offset, &leaf)
    }

    /// `update(key, new_record_pointer, old_record_pointer, metadata)`:
    /// remove the old binding and add the new one. The spec treats this
    /// as the composition of remove+add rather than an in-place metadata
    /// patch, since the key itself may differ.
    pub fn update(
        &mut self,
        key: TypedValue,
        new_record_pointer: RecordPointer,
        old_record_pointer: RecordPointer,
        metadata: Metadata,
    ) -> Result<()> {
        let _ = self.remove(&key, &old_record_pointer);
        self.add(key, new_record_pointer, metadata)
    }

    /// Apply a batch of operations, rebuilding and retrying once if any
    /// operation hits an internal-only error (`TreeFull`/`Eof`) caused by
    /// the region running out of addressable space or a leaf's ext
    /// region becoming unreadable mid-mutation.
    pub fn transaction(&mut self, ops: Vec<TreeOp>) -> Result<()> {
        for (i, op) in ops.iter().enumerate() {
            let result = self.apply_op(op);
            match result {
                Ok(()) => continue,
                Err(e) if matches!(e, IndexError::TreeFull | IndexError::Eof) => {
                    self.rebuild_in_place();
                    self.apply_op(op)?;
                    for remaining in &ops[i + 1..] {
                        self.apply_op(remaining)?;
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn apply_op(&mut self, op: &TreeOp) -> Result<()> {
        match op {
            TreeOp::Add { key, record_pointer, metadata } => {
                self.add(key.clone(), record_pointer.clone(), metadata.clone())
            }
            TreeOp::Remove { key, record_pointer } => self.remove(key, record_pointer),
            TreeOp::Update { key, record_pointer, old_record_pointer, metadata } => self.update(
                key.clone(),
                record_pointer.clone(),
                old_record_pointer.clone(),
                metadata.clone(),
            ),
        }
    }

    /// Flatten the live leaf chain into an ordered entry stream and
    /// rebuild the region from scratch at the configured rebuild fill
    /// factor (spec §4.4), reclaiming underfull leaves and fragmented
    /// free space in one pass.
    fn rebuild_in_place(&mut self) {
        let entries = self.flatten_leaf_chain();
        let built = bulk_build(entries, &self.cfg, self.metadata_count, self.cfg.rebuild_fill_factor);
        self.region = built.region;
        self.root_offset = built.root_offset;
        self.fst = built.fst;
    }

    /// Public entry point mirroring `rebuild_in_place`, for callers (the
    /// maintenance CLI, the query layer's explicit rebuild operation)
    /// that want to trigger a rebuild outside of a failed transaction.
    pub fn rebuild(&mut self) {
        self.rebuild_in_place();
    }

    fn flatten_leaf_chain(&self) -> Vec<LeafEntry> {
        let mut out = Vec::new();
        let Ok(mut offset) = self.leftmost_leaf() else { return out };
        loop {
            let Ok(leaf) = self.load_leaf(offset) else { break };
            out.extend(leaf.entries.iter().cloned());
            match leaf.next {
                Some(n) => offset = n,
                None => break,
            }
        }
        out
    }

    /// Total entry count, for diagnostics and `TreeStructureMetrics`.
    pub fn entry_count(&self) -> usize {
        self.flatten_leaf_chain().len()
    }

    /// Every live (key, value) pair in ascending key order, optionally
    /// reversed. Backs the fulltext/geo specializations' need for a full
    /// scan (e.g. `!contains`'s record universe) and the query
    /// front-end's `take(skip, take, ascending)` pagination.
    pub fn all_matches(&self, ascending: bool) -> Result<Vec<Match>> {
        let mut out = Vec::new();
        for entry in self.flatten_leaf_chain() {
            for v in &entry.values {
                out.push(Match {
                    key: entry.key.clone(),
                    record_pointer: v.record_pointer.clone(),
                    metadata: v.metadata.clone(),
                });
            }
        }
        if !ascending {
            out.reverse();
        }
        Ok(out)
    }

    /// Number of leaves in the chain, for `TreeStructureMetrics`.
    pub fn leaf_count(&self) -> usize {
        let Ok(mut offset) = self.leftmost_leaf() else { return 0 };
        let mut count = 0;
        loop {
            count += 1;
            let Ok(leaf) = self.load_leaf(offset) else { break };
            match leaf.next {
                Some(n) => offset = n,
                None => break,
            }
        }
        count
    }

    /// Root-to-leaf path length, for `TreeStructureMetrics`.
    pub fn depth(&self) -> usize {
        let mut offset = self.root_offset;
        let mut depth = 1;
        while let Ok(false) = self.is_leaf(offset) {
            depth += 1;
            let Ok(node) = self.load_internal(offset) else { break };
            offset = node.entries.first().map(|(_, c)| *c).unwrap_or(node.gt_child);
        }
        depth
    }

    /// Bytes the Free-Space Tracker currently considers reclaimable.
    pub fn free_space_total(&self) -> u64 {
        self.fst.total_free()
    }

    /// Total size of the tree's backing region, for fragmentation ratios.
    pub fn region_len(&self) -> usize {
        self.region.len()
    }
}

// Silence the unused `write_u48` import warning when built without the
// split path touching it directly (it's used transitively via `node`).
#[allow(unused_imports)]
use self::node as _node_reexport_anchor;

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(entries_per_node: u8) -> IndexEngineConfig {
        let mut c = IndexEngineConfig::default();
        c.entries_per_node = entries_per_node;
        c.leaf_free_fraction = 0.25;
        c
    }

    #[test]
    fn add_and_find_round_trips() {
        let mut tree = BPlusTree::new_empty(cfg(4), 0, true);
        tree.add(TypedValue::Int(1), RecordPointer::new(vec![], "a"), vec![]).unwrap();
        tree.add(TypedValue::Int(2), RecordPointer::new(vec![], "b"), vec![]).unwrap();
        let found = tree.find(&TypedValue::Int(1)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_pointer.key, "a");
    }

    #[test]
    fn add_triggers_leaf_split_and_stays_searchable() {
        let mut tree = BPlusTree::new_empty(cfg(4), 0, true);
        for i in 0..40 {
            tree.add(TypedValue::Int(i), RecordPointer::new(vec![], format!("r{i}")), vec![]).unwrap();
        }
        for i in 0..40 {
            let found = tree.find(&TypedValue::Int(i)).unwrap();
            assert_eq!(found.len(), 1, "missing key {i}");
        }
    }

    #[test]
    fn range_search_returns_bounded_window() {
        let mut tree = BPlusTree::new_empty(cfg(4), 0, true);
        for i in 0..30 {
            tree.add(TypedValue::Int(i), RecordPointer::new(vec![], format!("r{i}")), vec![]).unwrap();
        }
        let matches = tree.search(&Operator::Between(TypedValue::Int(10), TypedValue::Int(15))).unwrap();
        let mut got: Vec<i64> = matches
            .iter()
            .map(|m| if let TypedValue::Int(v) = m.key { v } else { unreachable!() })
            .collect();
        got.sort();
        assert_eq!(got, (10..=15).collect::<Vec<_>>());
    }

    #[test]
    fn remove_then_find_is_empty() {
        let mut tree = BPlusTree::new_empty(cfg(4), 0, true);
        tree.add(TypedValue::Int(1), RecordPointer::new(vec![], "a"), vec![]).unwrap();
        tree.remove(&TypedValue::Int(1), &RecordPointer::new(vec![], "a")).unwrap();
        assert!(tree.find(&TypedValue::Int(1)).unwrap().is_empty());
    }

    #[test]
    fn rebuild_preserves_all_entries() {
        let mut tree = BPlusTree::new_empty(cfg(4), 0, true);
        for i in 0..60 {
            tree.add(TypedValue::Int(i), RecordPointer::new(vec![], format!("r{i}")), vec![]).unwrap();
        }
        tree.rebuild();
        assert_eq!(tree.entry_count(), 60);
        for i in 0..60 {
            assert_eq!(tree.find(&TypedValue::Int(i)).unwrap().len(), 1);
        }
    }

    #[test]
    fn split_on_non_rightmost_child_keeps_right_half_reachable() {
        // add(10,20,30,40,50) rightmost-splits to root [(30,L)] gt=R;
        // add(5,25,1) then forces leaf L=[1,5,10,20,25] to split at
        // routing_key 10 as a non-rightmost (lt_child) parent entry.
        let mut tree = BPlusTree::new_empty(cfg(4), 0, true);
        for k in [10, 20, 30, 40, 50, 5, 25, 1] {
            tree.add(TypedValue::Int(k), RecordPointer::new(vec![], format!("r{k}")), vec![]).unwrap();
        }
        for k in [10, 20, 30, 40, 50, 5, 25, 1] {
            assert_eq!(tree.find(&TypedValue::Int(k)).unwrap().len(), 1, "missing key {k}");
        }
    }

    #[test]
    fn add_in_descending_order_stays_searchable() {
        // Descending insertion forces every leaf split to land on a
        // non-rightmost parent entry (the opposite of ascending
        // insertion, which only ever splits the rightmost child) and
        // repeatedly grows internal nodes past their initial reservation.
        let mut tree = BPlusTree::new_empty(cfg(4), 0, true);
        for i in (0..80).rev() {
            tree.add(TypedValue::Int(i), RecordPointer::new(vec![], format!("r{i}")), vec![]).unwrap();
        }
        for i in 0..80 {
            assert_eq!(tree.find(&TypedValue::Int(i)).unwrap().len(), 1, "missing key {i}");
        }
    }
}
