// Stage D: bulk build (spec §4.5). Feeds the merged, sorted entry stream
// into the shared bulk tree constructor, then either hands back a live
// `BPlusTree` (for a freshly created or rebuilt index held in memory) or
// streams it into a real index file behind the envelope's
// reserve-header/patch-length protocol.

use crate::config::IndexEngineConfig;
use crate::envelope::{patch_tree_byte_length, IndexHeader, TreeDescriptor, TypedMap};
use crate::error::Result;
use crate::io::WriteSink;
use crate::tree::node::LeafEntry;
use crate::tree::BPlusTree;

pub fn build_tree(entries: Vec<LeafEntry>, cfg: &IndexEngineConfig, metadata_count: usize, case_sensitive: bool) -> BPlusTree {
    BPlusTree::from_sorted_entries(entries, cfg.clone(), metadata_count, case_sensitive, cfg.bulk_fill_factor)
}

/// Write a complete index file: header (with a placeholder `byte_length`),
/// the tree region, then the patched header.
pub async fn build_to_sink(
    sink: &mut dyn WriteSink,
    index_info: TypedMap,
    entries: Vec<LeafEntry>,
    cfg: &IndexEngineConfig,
    metadata_count: usize,
) -> Result<()> {
    let tree = build_tree(entries, cfg, metadata_count, true);
    let header = IndexHeader {
        index_info,
        trees: vec![TreeDescriptor {
            tree_name: "default".into(),
            file_index: 0,
            byte_length: 0,
            tree_info: vec![("root_offset".into(), crate::types::TypedValue::Int(tree.root_offset() as i64))],
        }],
    };
    header.write_to(sink).await?;
    let region = tree.region();
    let region_len = region.len() as u32;
    sink.append(region).await?;
    patch_tree_byte_length(sink, header, "default", region_len).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryWriter;
    use crate::tree::node::ValueEntry;
    use crate::types::{RecordPointer, TypedValue};

    fn leaf_entry(k: i64) -> LeafEntry {
        LeafEntry {
            key: TypedValue::Int(k),
            values: vec![ValueEntry { record_pointer: RecordPointer::new(vec![], format!("r{k}")), metadata: vec![] }],
        }
    }

    #[test]
    fn build_tree_is_queryable() {
        let cfg = IndexEngineConfig::default();
        let entries: Vec<LeafEntry> = (0..20).map(leaf_entry).collect();
        let tree = build_tree(entries, &cfg, 0, true);
        let found = tree.find(&TypedValue::Int(10)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_pointer.key, "r10");
    }

    #[tokio::test]
    async fn build_to_sink_writes_header_and_region() {
        let cfg = IndexEngineConfig::default();
        let entries: Vec<LeafEntry> = (0..5).map(leaf_entry).collect();
        let mut sink = MemoryWriter::new();
        build_to_sink(&mut sink, vec![], entries, &cfg, 0).await.unwrap();

        let mut src = crate::io::MemoryReader::new(&sink.buf);
        let (header, header_length) = IndexHeader::read_from(&mut src).await.unwrap();
        assert!(header.trees[0].byte_length > 0);
        assert!((header_length as usize) < sink.buf.len());
    }
}
