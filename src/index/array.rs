// Array index (spec §4.6): the indexed field is an array of scalars.
// Each element becomes its own tree entry; updates diff old[] vs new[]
// by element equality. Query surface is deliberately narrow: `contains`
// / `!contains` (translated to `==`/`!=` on the underlying tree) plus
// existence checks.

use super::{translate_basic_operator, DiffOp, IndexProjection, IndexSpec, QueryValue};
use crate::error::Result;
use crate::tree::{BPlusTree, Match};
use crate::types::{Metadata, TypedValue};

pub struct Array;

const OPERATORS: &[&str] = &["contains", "!contains", "exists", "!exists"];

fn elements(value: &TypedValue) -> Vec<TypedValue> {
    match value {
        TypedValue::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

impl IndexProjection for Array {
    fn valid_operators(&self) -> &'static [&'static str] {
        OPERATORS
    }

    fn project_for_build(&self, _spec: &IndexSpec, value: &TypedValue, include: &Metadata) -> Vec<(TypedValue, Metadata)> {
        elements(value).into_iter().map(|el| (el, include.clone())).collect()
    }

    fn diff_update(
        &self,
        _spec: &IndexSpec,
        old: Option<&TypedValue>,
        new: Option<&TypedValue>,
        include_old: &Metadata,
        include_new: &Metadata,
    ) -> Vec<DiffOp> {
        let old_elems = old.map(elements).unwrap_or_default();
        let new_elems = new.map(elements).unwrap_or_default();

        let mut ops = Vec::new();
        for el in &old_elems {
            if !new_elems.contains(el) {
                ops.push((el.clone(), include_old.clone(), false));
            }
        }
        for el in &new_elems {
            if !old_elems.contains(el) {
                ops.push((el.clone(), include_new.clone(), true));
            }
        }
        ops
    }

    fn execute_query(&self, tree: &BPlusTree, _spec: &IndexSpec, op: &str, value: &QueryValue) -> Result<Vec<Match>> {
        let translated = match op {
            "contains" => "==",
            "!contains" => "!=",
            other => other,
        };
        let operator = translate_basic_operator(translated, value)?;
        tree.search(&operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;

    fn spec() -> IndexSpec {
        IndexSpec {
            path: "chats".into(),
            key: "members".into(),
            include_keys: vec![],
            case_sensitive: true,
            locale: "en".into(),
            index_type: IndexType::Array,
        }
    }

    fn arr(items: &[&str]) -> TypedValue {
        TypedValue::Array(items.iter().map(|s| TypedValue::String(s.to_string())).collect())
    }

    #[test]
    fn scenario_three_array_membership_diff() {
        let a = Array;
        let old = arr(&["a", "b", "c"]);
        let new = arr(&["a", "c", "d"]);
        let ops = a.diff_update(&spec(), Some(&old), Some(&new), &[], &[]);

        let removed: Vec<&TypedValue> = ops.iter().filter(|(_, _, add)| !add).map(|(k, _, _)| k).collect();
        let added: Vec<&TypedValue> = ops.iter().filter(|(_, _, add)| *add).map(|(k, _, _)| k).collect();
        assert_eq!(removed, vec![&TypedValue::String("b".into())]);
        assert_eq!(added, vec![&TypedValue::String("d".into())]);
    }

    #[test]
    fn project_for_build_emits_one_entry_per_element() {
        let a = Array;
        let out = a.project_for_build(&spec(), &arr(&["a", "b", "c"]), &[]);
        assert_eq!(out.len(), 3);
    }
}
