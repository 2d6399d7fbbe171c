// Index envelope / header (spec §4.7): the fixed, block-aligned prologue
// that precedes the tree region in every `.idx` file.
//
// ```
// signature        : 10 bytes "ACEBASEIDX"
// layout_version   : u8
// header_length    : u32 (offset of tree region)
// index_info       : typed map
// trees_count      : u8
// for each tree: tree_name, file_index, byte_length, tree_info (typed map)
// padding          : to next 4096 boundary
// ```
//
// Typed-map values reuse the key codec (§4.2): UNDEFINED, STRING, NUMBER,
// BOOLEAN, ARRAY. A map is encoded as an ARRAY of `[STRING key, value]`
// pairs rather than inventing a second length-prefix scheme.

use crate::codec::{decode_value, encode_value};
use crate::error::{IndexError, Result};
use crate::io::{ReadSource, WriteSink};
use crate::types::TypedValue;

pub const SIGNATURE: &[u8; 10] = b"ACEBASEIDX";
pub const LAYOUT_VERSION: u8 = 1;
pub const ALIGNMENT: u64 = 4096;

pub type TypedMap = Vec<(String, TypedValue)>;

pub fn map_get<'a>(map: &'a TypedMap, key: &str) -> Option<&'a TypedValue> {
    map.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn encode_map(map: &TypedMap, out: &mut Vec<u8>) {
    let mut pairs = Vec::with_capacity(map.len());
    for (k, v) in map {
        pairs.push(TypedValue::String(k.clone()));
        pairs.push(v.clone());
    }
    encode_value(&TypedValue::Array(pairs), out);
}

fn decode_map(buf: &[u8]) -> Result<(TypedMap, usize)> {
    let (value, used) = decode_value(buf)?;
    let TypedValue::Array(items) = value else {
        return Err(IndexError::UnsupportedFormat(0));
    };
    let mut map = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        let TypedValue::String(key) = k else {
            return Err(IndexError::UnsupportedFormat(0));
        };
        map.push((key, v));
    }
    Ok((map, used))
}

/// One tree descriptor inside the header (spec names exactly one, the
/// `"default"` tree; the layout allows more, future-proofing for
/// multi-tree indexes the spec itself never needs).
#[derive(Debug, Clone, PartialEq)]
pub struct TreeDescriptor {
    pub tree_name: String,
    pub file_index: u32,
    pub byte_length: u32,
    pub tree_info: TypedMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    pub index_info: TypedMap,
    pub trees: Vec<TreeDescriptor>,
}

impl IndexHeader {
    /// Serialize the header, padded to the next 4096-byte boundary. The
    /// returned `header_length` is the offset at which the tree region
    /// begins, i.e. the padded length including the signature/version
    /// prologue.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        encode_map(&self.index_info, &mut body);
        body.push(self.trees.len().min(u8::MAX as usize) as u8);
        for tree in &self.trees {
            let name_bytes = tree.tree_name.as_bytes();
            body.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
            body.extend_from_slice(name_bytes);
            body.extend_from_slice(&tree.file_index.to_be_bytes());
            body.extend_from_slice(&tree.byte_length.to_be_bytes());
            encode_map(&tree.tree_info, &mut body);
        }

        // prologue: signature(10) + version(1) + header_length(4)
        let prologue_len = 15;
        let unpadded = prologue_len + body.len();
        let header_length = unpadded.div_ceil(ALIGNMENT as usize) * (ALIGNMENT as usize);

        let mut out = Vec::with_capacity(header_length);
        out.extend_from_slice(SIGNATURE);
        out.push(LAYOUT_VERSION);
        out.extend_from_slice(&(header_length as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out.resize(header_length, 0);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, u32)> {
        let sig = buf.get(..10).ok_or(IndexError::Eof)?;
        if sig != SIGNATURE {
            return Err(IndexError::UnsupportedFormat(0));
        }
        let version = *buf.get(10).ok_or(IndexError::Eof)?;
        if version != LAYOUT_VERSION {
            return Err(IndexError::UnsupportedFormat(version));
        }
        let header_length =
            u32::from_be_bytes(buf.get(11..15).ok_or(IndexError::Eof)?.try_into().unwrap());
        let mut pos = 15usize;

        let (index_info, used) = decode_map(&buf[pos..])?;
        pos += used;

        let trees_count = *buf.get(pos).ok_or(IndexError::Eof)? as usize;
        pos += 1;
        let mut trees = Vec::with_capacity(trees_count);
        for _ in 0..trees_count {
            let name_len =
                u16::from_be_bytes(buf.get(pos..pos + 2).ok_or(IndexError::Eof)?.try_into().unwrap())
                    as usize;
            pos += 2;
            let name_bytes = buf.get(pos..pos + name_len).ok_or(IndexError::Eof)?;
            let tree_name = String::from_utf8_lossy(name_bytes).into_owned();
            pos += name_len;
            let file_index =
                u32::from_be_bytes(buf.get(pos..pos + 4).ok_or(IndexError::Eof)?.try_into().unwrap());
            pos += 4;
            let byte_length =
                u32::from_be_bytes(buf.get(pos..pos + 4).ok_or(IndexError::Eof)?.try_into().unwrap());
            pos += 4;
            let (tree_info, used) = decode_map(&buf[pos..])?;
            pos += used;
            trees.push(TreeDescriptor { tree_name, file_index, byte_length, tree_info });
        }

        Ok((Self { index_info, trees }, header_length))
    }

    /// Write the header to `sink` at offset 0, returning the tree-region
    /// start offset (`header_length`). Callers that don't yet know the
    /// final `byte_length` of each tree should write a placeholder header
    /// first, stream the tree, then call `patch_tree_byte_length`.
    pub async fn write_to(&self, sink: &mut dyn WriteSink) -> Result<u32> {
        let bytes = self.encode();
        let header_length = bytes.len() as u32;
        sink.write_at(&bytes, 0).await?;
        Ok(header_length)
    }

    pub async fn read_from(src: &mut dyn ReadSource) -> Result<(Self, u32)> {
        src.go(0).await?;
        let prologue = src.get(15).await?;
        let header_length =
            u32::from_be_bytes(prologue.get(11..15).ok_or(IndexError::Eof)?.try_into().unwrap());
        src.go(0).await?;
        let whole = src.get(header_length as usize).await?;
        Self::decode(&whole)
    }
}

/// Patch the `byte_length` field of the (single, `"default"`) tree
/// descriptor after streaming the tree bytes (spec §4.5 stage D: "reserve
/// header... then patches the header's `tree_byte_length` field").
pub async fn patch_tree_byte_length(
    sink: &mut dyn WriteSink,
    mut header: IndexHeader,
    tree_name: &str,
    byte_length: u32,
) -> Result<()> {
    if let Some(tree) = header.trees.iter_mut().find(|t| t.tree_name == tree_name) {
        tree.byte_length = byte_length;
    }
    let bytes = header.encode();
    sink.write_at(&bytes, 0).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryWriter;

    fn sample_header() -> IndexHeader {
        IndexHeader {
            index_info: vec![
                ("type".into(), TypedValue::String("normal".into())),
                ("path".into(), TypedValue::String("songs".into())),
                ("key".into(), TypedValue::String("year".into())),
                ("cs".into(), TypedValue::Boolean(false)),
            ],
            trees: vec![TreeDescriptor {
                tree_name: "default".into(),
                file_index: 4096,
                byte_length: 0,
                tree_info: vec![("entries".into(), TypedValue::Int(0))],
            }],
        }
    }

    #[test]
    fn header_round_trips_and_is_4096_aligned() {
        let header = sample_header();
        let bytes = header.encode();
        assert_eq!(bytes.len() % ALIGNMENT as usize, 0);
        let (decoded, header_length) = IndexHeader::decode(&bytes).unwrap();
        assert_eq!(header_length as usize, bytes.len());
        assert_eq!(decoded, header);
    }

    #[test]
    fn bad_signature_is_unsupported_format() {
        let mut bytes = sample_header().encode();
        bytes[0] = b'X';
        assert!(matches!(IndexHeader::decode(&bytes), Err(IndexError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn write_then_patch_byte_length() {
        let header = sample_header();
        let mut sink = MemoryWriter::new();
        let header_length = header.write_to(&mut sink).await.unwrap();
        sink.append(&vec![0xAB; 128]).await.unwrap();
        patch_tree_byte_length(&mut sink, header.clone(), "default", 128).await.unwrap();

        let mut src = crate::io::MemoryReader::new(&sink.buf);
        let (decoded, decoded_len) = IndexHeader::read_from(&mut src).await.unwrap();
        assert_eq!(decoded_len, header_length);
        assert_eq!(decoded.trees[0].byte_length, 128);
    }
}
