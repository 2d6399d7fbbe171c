// Key/value codec: scalar keys, record pointers, and typed-map values share
// one tag+length+payload scheme. All multi-byte integers are big-endian,
// matching the rest of the on-disk format.

use crate::error::{IndexError, Result};
use crate::types::{RecordPointer, TypedValue};

pub const TAG_UNDEFINED: u8 = 0;
pub const TAG_STRING: u8 = 1;
pub const TAG_INT: u8 = 2;
pub const TAG_FLOAT: u8 = 3;
pub const TAG_BOOLEAN: u8 = 4;
pub const TAG_DATETIME: u8 = 5;
pub const TAG_BINARY: u8 = 6;
pub const TAG_ARRAY: u8 = 7;

/// Strings longer than this are truncated before encoding.
pub const MAX_STRING_BYTES: usize = 255;

/// Flip the sign bit of a two's-complement `i64` so the big-endian byte
/// representation sorts the same way unsigned as the value does signed
/// (spec §8 "order preservation": `encode(a) <_lex encode(b) iff a < b`).
fn order_preserving_int_bits(v: i64) -> u64 {
    (v as u64) ^ 0x8000_0000_0000_0000
}

fn order_preserving_int_from_bits(bits: u64) -> i64 {
    (bits ^ 0x8000_0000_0000_0000) as i64
}

/// Map an IEEE-754 double's bit pattern so big-endian unsigned comparison
/// of the encoded bytes matches `f64`'s total (non-NaN) order: flip every
/// bit for negatives, flip only the sign bit for non-negatives.
fn order_preserving_float_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

fn order_preserving_float_from_bits(encoded: u64) -> f64 {
    let bits = if encoded & 0x8000_0000_0000_0000 != 0 {
        encoded & !0x8000_0000_0000_0000
    } else {
        !encoded
    };
    f64::from_bits(bits)
}

/// Encode a key/metadata scalar as `type_tag + length + payload`.
pub fn encode_value(value: &TypedValue, out: &mut Vec<u8>) {
    match value {
        TypedValue::Undefined => out.push(TAG_UNDEFINED),
        TypedValue::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(if *b { 1 } else { 0 });
        }
        TypedValue::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&order_preserving_int_bits(*v).to_be_bytes());
        }
        TypedValue::Float(v) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&order_preserving_float_bits(*v).to_be_bytes());
        }
        TypedValue::DateTime(v) => {
            out.push(TAG_DATETIME);
            out.extend_from_slice(&order_preserving_int_bits(*v).to_be_bytes());
        }
        TypedValue::String(s) => {
            out.push(TAG_STRING);
            let bytes = truncate_utf8(s.as_bytes(), MAX_STRING_BYTES);
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        TypedValue::Binary(b) => {
            out.push(TAG_BINARY);
            let len = b.len().min(u16::MAX as usize);
            out.extend_from_slice(&(len as u16).to_be_bytes());
            out.extend_from_slice(&b[..len]);
        }
        TypedValue::Array(items) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u16).to_be_bytes());
            for item in items {
                encode_value(item, out);
            }
        }
    }
}

/// Truncate a byte slice to at most `max` bytes without splitting a UTF-8
/// code point.
fn truncate_utf8(bytes: &[u8], max: usize) -> &[u8] {
    if bytes.len() <= max {
        return bytes;
    }
    let mut cut = max;
    while cut > 0 && (bytes[cut] & 0b1100_0000) == 0b1000_0000 {
        cut -= 1;
    }
    &bytes[..cut]
}

/// Decode one typed scalar from `buf` starting at offset 0. Returns the
/// value and the number of bytes consumed.
pub fn decode_value(buf: &[u8]) -> Result<(TypedValue, usize)> {
    let tag = *buf.first().ok_or(IndexError::Eof)?;
    let rest = &buf[1..];
    match tag {
        TAG_UNDEFINED => Ok((TypedValue::Undefined, 1)),
        TAG_BOOLEAN => {
            let b = *rest.first().ok_or(IndexError::Eof)?;
            Ok((TypedValue::Boolean(b != 0), 2))
        }
        TAG_INT => {
            let arr: [u8; 8] = rest.get(..8).ok_or(IndexError::Eof)?.try_into().unwrap();
            Ok((TypedValue::Int(order_preserving_int_from_bits(u64::from_be_bytes(arr))), 9))
        }
        TAG_FLOAT => {
            let arr: [u8; 8] = rest.get(..8).ok_or(IndexError::Eof)?.try_into().unwrap();
            Ok((TypedValue::Float(order_preserving_float_from_bits(u64::from_be_bytes(arr))), 9))
        }
        TAG_DATETIME => {
            let arr: [u8; 8] = rest.get(..8).ok_or(IndexError::Eof)?.try_into().unwrap();
            Ok((TypedValue::DateTime(order_preserving_int_from_bits(u64::from_be_bytes(arr))), 9))
        }
        TAG_STRING => {
            let len_bytes: [u8; 2] = rest.get(..2).ok_or(IndexError::Eof)?.try_into().unwrap();
            let len = u16::from_be_bytes(len_bytes) as usize;
            let payload = rest.get(2..2 + len).ok_or(IndexError::Eof)?;
            let s = String::from_utf8_lossy(payload).into_owned();
            Ok((TypedValue::String(s), 1 + 2 + len))
        }
        TAG_BINARY => {
            let len_bytes: [u8; 2] = rest.get(..2).ok_or(IndexError::Eof)?.try_into().unwrap();
            let len = u16::from_be_bytes(len_bytes) as usize;
            let payload = rest.get(2..2 + len).ok_or(IndexError::Eof)?;
            Ok((TypedValue::Binary(payload.to_vec()), 1 + 2 + len))
        }
        TAG_ARRAY => {
            let len_bytes: [u8; 2] = rest.get(..2).ok_or(IndexError::Eof)?.try_into().unwrap();
            let n = u16::from_be_bytes(len_bytes) as usize;
            let mut consumed = 1 + 2;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                let (v, used) = decode_value(&buf[consumed..])?;
                items.push(v);
                consumed += used;
            }
            Ok((TypedValue::Array(items), consumed))
        }
        _ => Err(IndexError::UnsupportedFormat(tag)),
    }
}

/// Encode a record pointer: `wildcards_len u8, [wildcard_len u8 + bytes]*,
/// key_len u8 + key_bytes`.
pub fn encode_record_pointer(rp: &RecordPointer, out: &mut Vec<u8>) {
    out.push(rp.wildcards.len() as u8);
    for w in &rp.wildcards {
        let bytes = w.as_bytes();
        let len = bytes.len().min(u8::MAX as usize);
        out.push(len as u8);
        out.extend_from_slice(&bytes[..len]);
    }
    let key_bytes = rp.key.as_bytes();
    let key_len = key_bytes.len().min(u8::MAX as usize);
    out.push(key_len as u8);
    out.extend_from_slice(&key_bytes[..key_len]);
}

pub fn decode_record_pointer(buf: &[u8]) -> Result<(RecordPointer, usize)> {
    let wcount = *buf.first().ok_or(IndexError::Eof)? as usize;
    let mut pos = 1;
    let mut wildcards = Vec::with_capacity(wcount);
    for _ in 0..wcount {
        let len = *buf.get(pos).ok_or(IndexError::Eof)? as usize;
        pos += 1;
        let bytes = buf.get(pos..pos + len).ok_or(IndexError::Eof)?;
        wildcards.push(String::from_utf8_lossy(bytes).into_owned());
        pos += len;
    }
    let key_len = *buf.get(pos).ok_or(IndexError::Eof)? as usize;
    pos += 1;
    let key_bytes = buf.get(pos..pos + key_len).ok_or(IndexError::Eof)?;
    let key = String::from_utf8_lossy(key_bytes).into_owned();
    pos += key_len;
    Ok((RecordPointer::new(wildcards, key), pos))
}

/// Byte-lexicographic comparison of two encoded keys agrees with
/// `compare_keys` on the decoded values whenever both keys share a type
/// (property tested in §8 "order preservation"). This helper is used by
/// tests only; the tree itself always compares decoded `TypedValue`s so it
/// can honor `case_sensitive` without re-encoding.
#[cfg(test)]
pub fn encoded_bytes(v: &TypedValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(v, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compare_keys;
    use proptest::prelude::*;
    use std::cmp::Ordering;

    fn arb_scalar() -> impl Strategy<Value = TypedValue> {
        prop_oneof![
            Just(TypedValue::Undefined),
            any::<bool>().prop_map(TypedValue::Boolean),
            any::<i64>().prop_map(TypedValue::Int),
            any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(TypedValue::Float),
            any::<i64>().prop_map(TypedValue::DateTime),
            ".{0,64}".prop_map(TypedValue::String),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(TypedValue::Binary),
        ]
    }

    proptest! {
        #[test]
        fn round_trip_any_scalar(v in arb_scalar()) {
            let mut buf = Vec::new();
            encode_value(&v, &mut buf);
            let (decoded, used) = decode_value(&buf).unwrap();
            prop_assert_eq!(used, buf.len());
            match (&v, &decoded) {
                (TypedValue::String(a), TypedValue::String(b)) => {
                    // truncation can shrink long strings; only compare when short
                    if a.len() <= MAX_STRING_BYTES {
                        prop_assert_eq!(a, b);
                    }
                }
                _ => prop_assert_eq!(v, decoded),
            }
        }

        #[test]
        fn order_preservation_same_type_numeric(a in any::<i64>(), b in any::<i64>()) {
            let ea = encoded_bytes(&TypedValue::Int(a));
            let eb = encoded_bytes(&TypedValue::Int(b));
            let byte_order = ea.cmp(&eb);
            let value_order = a.cmp(&b);
            prop_assert_eq!(byte_order, value_order);
        }
    }

    #[test]
    fn record_pointer_round_trip() {
        let rp = RecordPointer::new(vec!["a".into(), "bb".into()], "child");
        let mut buf = Vec::new();
        encode_record_pointer(&rp, &mut buf);
        let (decoded, used) = decode_record_pointer(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, rp);
    }

    #[test]
    fn decode_past_end_is_eof() {
        let err = decode_value(&[TAG_STRING, 0, 10]).unwrap_err();
        assert!(matches!(err, IndexError::Eof));
    }

    #[test]
    fn string_order_matches_total_order_when_case_sensitive() {
        let a = TypedValue::String("abc".into());
        let b = TypedValue::String("abd".into());
        assert_eq!(
            encoded_bytes(&a).cmp(&encoded_bytes(&b)),
            compare_keys(&a, &b, true)
        );
        let _ = Ordering::Less; // silence unused import in some feature combos
    }
}
