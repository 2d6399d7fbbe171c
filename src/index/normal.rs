// Normal index (spec §4.6): maps `path/{k}` . `v[key]` directly to a
// tree entry. The only specialization-specific behavior is the diff on
// update ("emit one remove + one add unless unchanged").

use super::{translate_basic_operator, DiffOp, IndexProjection, IndexSpec, QueryValue};
use crate::error::Result;
use crate::tree::{BPlusTree, Match};
use crate::types::{Metadata, TypedValue};

pub struct Normal;

const OPERATORS: &[&str] = &[
    "==", "!=", "<", "<=", ">", ">=", "in", "!in", "between", "!between", "like", "!like",
    "matches", "!matches", "exists", "!exists",
];

impl IndexProjection for Normal {
    fn valid_operators(&self) -> &'static [&'static str] {
        OPERATORS
    }

    fn project_for_build(&self, _spec: &IndexSpec, value: &TypedValue, include: &Metadata) -> Vec<(TypedValue, Metadata)> {
        vec![(value.clone(), include.clone())]
    }

    fn diff_update(
        &self,
        _spec: &IndexSpec,
        old: Option<&TypedValue>,
        new: Option<&TypedValue>,
        include_old: &Metadata,
        include_new: &Metadata,
    ) -> Vec<DiffOp> {
        if old == new && include_old == include_new {
            return Vec::new();
        }
        let mut ops = Vec::new();
        if let Some(o) = old {
            ops.push((o.clone(), include_old.clone(), false));
        }
        if let Some(n) = new {
            ops.push((n.clone(), include_new.clone(), true));
        }
        ops
    }

    fn execute_query(&self, tree: &BPlusTree, _spec: &IndexSpec, op: &str, value: &QueryValue) -> Result<Vec<Match>> {
        let operator = translate_basic_operator(op, value)?;
        tree.search(&operator)
    }
}
