// Domain value types shared by the codec, tree, and index layers.
//
// `TypedValue` is the scalar key/metadata value carried through the codec.
// `RecordPointer` is the locator back to the (opaque) primary store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A key or metadata scalar, tagged by type the way the on-disk codec
/// tags it. `Array` only ever appears as metadata (e.g. fulltext
/// `_occurs_`), never as a tree key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    Undefined,
    Boolean(bool),
    Int(i64),
    Float(f64),
    /// Milliseconds since epoch.
    DateTime(i64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<TypedValue>),
}

impl TypedValue {
    pub fn type_rank(&self) -> u8 {
        match self {
            TypedValue::Undefined => 0,
            TypedValue::Boolean(_) => 1,
            TypedValue::Int(_) | TypedValue::Float(_) | TypedValue::DateTime(_) => 2,
            TypedValue::String(_) => 3,
            TypedValue::Binary(_) => 4,
            TypedValue::Array(_) => 5,
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            TypedValue::Int(v) => Some(*v as f64),
            TypedValue::Float(v) => Some(*v),
            TypedValue::DateTime(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Total order over keys: undefined < boolean < number/datetime
/// (numerically) < string (byte-wise on the case-folded form when
/// `case_sensitive` is false) < binary (lexicographic). Arrays never
/// participate in leaf ordering; comparing one is a programmer error in
/// the caller, not a recoverable condition, so we order them last by rank.
pub fn compare_keys(a: &TypedValue, b: &TypedValue, case_sensitive: bool) -> Ordering {
    let (ra, rb) = (a.type_rank(), b.type_rank());
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (TypedValue::Undefined, TypedValue::Undefined) => Ordering::Equal,
        (TypedValue::Boolean(x), TypedValue::Boolean(y)) => x.cmp(y),
        (_, _) if a.numeric().is_some() && b.numeric().is_some() => a
            .numeric()
            .unwrap()
            .partial_cmp(&b.numeric().unwrap())
            .unwrap_or(Ordering::Equal),
        (TypedValue::String(x), TypedValue::String(y)) => {
            if case_sensitive {
                x.as_bytes().cmp(y.as_bytes())
            } else {
                x.to_lowercase().as_bytes().cmp(y.to_lowercase().as_bytes())
            }
        }
        (TypedValue::Binary(x), TypedValue::Binary(y)) => x.cmp(y),
        (TypedValue::Array(x), TypedValue::Array(y)) => x.len().cmp(&y.len()),
        _ => Ordering::Equal,
    }
}

/// Locator back to a record in the primary store: the wildcard bindings
/// substituted for each `*` in the index path, plus the child's key name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordPointer {
    pub wildcards: Vec<String>,
    pub key: String,
}

impl RecordPointer {
    pub fn new(wildcards: Vec<String>, key: impl Into<String>) -> Self {
        Self { wildcards, key: key.into() }
    }

    /// Substitute the wildcards, in order, into the index's `*`-bearing
    /// path to recover the record's absolute path.
    pub fn absolute_path(&self, index_path: &str) -> String {
        let mut bindings = self.wildcards.iter();
        let mut out = String::with_capacity(index_path.len());
        for segment in index_path.split('/') {
            if !out.is_empty() {
                out.push('/');
            }
            if segment == "*" {
                out.push_str(bindings.next().map(String::as_str).unwrap_or("*"));
            } else {
                out.push_str(segment);
            }
        }
        out.push('/');
        out.push_str(&self.key);
        out
    }
}

/// Metadata co-stored with a value: the index's configured `include_keys`
/// plus any index-specific extras (e.g. fulltext `_occurs_`), in a fixed
/// order agreed by `Tree::metadata_keys`.
pub type Metadata = Vec<TypedValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_respects_type_rank() {
        use TypedValue::*;
        assert_eq!(compare_keys(&Undefined, &Boolean(true), true), Ordering::Less);
        assert_eq!(compare_keys(&Boolean(true), &Int(0), true), Ordering::Less);
        assert_eq!(compare_keys(&Int(5), &String("a".into()), true), Ordering::Less);
        assert_eq!(
            compare_keys(&String("z".into()), &Binary(vec![0]), true),
            Ordering::Less
        );
    }

    #[test]
    fn numeric_compares_across_int_float_datetime() {
        use TypedValue::*;
        assert_eq!(compare_keys(&Int(5), &Float(5.0), true), Ordering::Equal);
        assert_eq!(compare_keys(&Int(4), &DateTime(5), true), Ordering::Less);
    }

    #[test]
    fn string_order_honors_case_sensitivity() {
        use TypedValue::*;
        let a = String("Banana".into());
        let b = String("apple".into());
        // case-sensitive: uppercase 'B' (0x42) < lowercase 'a' (0x61)
        assert_eq!(compare_keys(&a, &b, true), Ordering::Less);
        // case-insensitive: "banana" > "apple"
        assert_eq!(compare_keys(&a, &b, false), Ordering::Greater);
    }

    #[test]
    fn record_pointer_substitutes_wildcards_in_order() {
        let rp = RecordPointer::new(vec!["u1".into()], "p1");
        assert_eq!(rp.absolute_path("users/*/posts"), "users/u1/posts/p1");
    }
}
