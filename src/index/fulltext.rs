// Fulltext index (spec §4.6): tokenizes a string field into words and
// indexes each unique word once per record, with its occurrence
// positions carried in `_occurs_` metadata so phrase queries can check
// adjacency without re-reading the primary store. Latin tokenization
// only, per spec's explicit non-goal.

use super::{fold_case, DiffOp, IndexProjection, IndexSpec, QueryValue};
use crate::error::{IndexError, Result};
use crate::tree::ops::Operator;
use crate::tree::{BPlusTree, Match};
use crate::types::{Metadata, RecordPointer, TypedValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

pub struct FullText;

const OPERATORS: &[&str] = &["contains", "!contains"];

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w']+").unwrap());

/// Tokenize into `(word, positions)`, case-folded per the index's spec.
fn tokenize(text: &str, case_sensitive: bool) -> HashMap<String, Vec<u32>> {
    let mut words: HashMap<String, Vec<u32>> = HashMap::new();
    for (pos, m) in WORD_RE.find_iter(text).enumerate() {
        let word = fold_case(m.as_str(), case_sensitive);
        words.entry(word).or_default().push(pos as u32);
    }
    words
}

fn as_text(value: &TypedValue) -> String {
    match value {
        TypedValue::String(s) => s.clone(),
        other => format!("{other:?}"),
    }
}

fn occurs_metadata(include: &Metadata, positions: &[u32]) -> Metadata {
    let mut metadata = include.clone();
    let encoded = positions.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
    metadata.push(TypedValue::String(encoded));
    metadata
}

fn decode_positions(value: &TypedValue) -> Vec<u32> {
    match value {
        TypedValue::String(s) if !s.is_empty() => {
            s.split(',').filter_map(|p| p.parse().ok()).collect()
        }
        _ => Vec::new(),
    }
}

/// One OR-separated search term: either a bare word/glob or a quoted
/// phrase requiring consecutive positions.
enum Term {
    Word(String),
    Phrase(Vec<String>),
}

fn parse_terms(query: &str) -> Vec<Term> {
    query
        .split(" OR ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| {
            if raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2 {
                let inner = &raw[1..raw.len() - 1];
                Term::Phrase(inner.split_whitespace().map(str::to_string).collect())
            } else {
                Term::Word(raw.to_string())
            }
        })
        .collect()
}

fn has_glob(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

fn matches_for_word(tree: &BPlusTree, word: &str, case_sensitive: bool) -> Result<Vec<Match>> {
    let folded = fold_case(word, case_sensitive);
    if has_glob(&folded) {
        tree.search(&Operator::Like(folded))
    } else {
        tree.find(&TypedValue::String(folded))
    }
}

/// A phrase matches a record iff every consecutive word pair in it has
/// adjacent positions (`p`, `p+1`) recorded against that record pointer.
fn matches_for_phrase(tree: &BPlusTree, words: &[String], case_sensitive: bool) -> Result<Vec<Match>> {
    if words.is_empty() {
        return Ok(Vec::new());
    }
    let mut per_word: Vec<HashMap<RecordPointer, Vec<u32>>> = Vec::with_capacity(words.len());
    for word in words {
        let folded = fold_case(word, case_sensitive);
        let found = tree.find(&TypedValue::String(folded))?;
        let mut by_pointer: HashMap<RecordPointer, Vec<u32>> = HashMap::new();
        for m in found {
            let positions = m.metadata.last().map(decode_positions).unwrap_or_default();
            by_pointer.entry(m.record_pointer).or_default().extend(positions);
        }
        per_word.push(by_pointer);
    }

    let anchor = &per_word[0];
    let mut matches = Vec::new();
    'candidates: for (pointer, first_positions) in anchor {
        for start in first_positions {
            let mut ok = true;
            for (offset, word_positions) in per_word.iter().enumerate().skip(1) {
                let expected = start + offset as u32;
                match word_positions.get(pointer) {
                    Some(positions) if positions.contains(&expected) => {}
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                matches.push(Match {
                    key: TypedValue::String(words.join(" ")),
                    record_pointer: pointer.clone(),
                    metadata: Vec::new(),
                });
                continue 'candidates;
            }
        }
    }
    Ok(matches)
}

impl IndexProjection for FullText {
    fn valid_operators(&self) -> &'static [&'static str] {
        OPERATORS
    }

    fn project_for_build(&self, spec: &IndexSpec, value: &TypedValue, include: &Metadata) -> Vec<(TypedValue, Metadata)> {
        let words = tokenize(&as_text(value), spec.case_sensitive);
        words
            .into_iter()
            .map(|(word, positions)| (TypedValue::String(word), occurs_metadata(include, &positions)))
            .collect()
    }

    fn diff_update(
        &self,
        spec: &IndexSpec,
        old: Option<&TypedValue>,
        new: Option<&TypedValue>,
        include_old: &Metadata,
        include_new: &Metadata,
    ) -> Vec<DiffOp> {
        let old_words = old.map(|v| tokenize(&as_text(v), spec.case_sensitive)).unwrap_or_default();
        let new_words = new.map(|v| tokenize(&as_text(v), spec.case_sensitive)).unwrap_or_default();

        let old_set: HashSet<&String> = old_words.keys().collect();
        let new_set: HashSet<&String> = new_words.keys().collect();

        let mut ops = Vec::new();
        for word in &old_set {
            if !new_set.contains(*word) {
                ops.push((TypedValue::String((*word).clone()), include_old.clone(), false));
            }
        }
        for word in &new_set {
            let changed = match old_words.get(*word) {
                Some(old_positions) => old_positions != &new_words[*word],
                None => true,
            };
            if changed {
                if old_set.contains(word) {
                    ops.push((TypedValue::String((*word).clone()), include_old.clone(), false));
                }
                let positions = &new_words[*word];
                ops.push((TypedValue::String((*word).clone()), occurs_metadata(include_new, positions), true));
            }
        }
        ops
    }

    fn execute_query(&self, tree: &BPlusTree, spec: &IndexSpec, op: &str, value: &QueryValue) -> Result<Vec<Match>> {
        let query = match value {
            QueryValue::Text(t) => t.clone(),
            _ => return Err(IndexError::InvalidArgument { op: op.into(), index: "fulltext index expects text".into() }),
        };

        let mut positive: HashMap<RecordPointer, Match> = HashMap::new();
        for term in parse_terms(&query) {
            let found = match term {
                Term::Word(word) => matches_for_word(tree, &word, spec.case_sensitive)?,
                Term::Phrase(words) => matches_for_phrase(tree, &words, spec.case_sensitive)?,
            };
            for m in found {
                positive.entry(m.record_pointer.clone()).or_insert(m);
            }
        }

        match op {
            "contains" => Ok(positive.into_values().collect()),
            "!contains" => {
                let universe = tree.all_matches(true)?;
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for m in universe {
                    if !positive.contains_key(&m.record_pointer) && seen.insert(m.record_pointer.clone()) {
                        out.push(m);
                    }
                }
                Ok(out)
            }
            other => Err(IndexError::InvalidArgument { op: other.into(), index: "fulltext index".into() }),
        }
    }
}
