// Stage C: k-way merge (spec §4.5). Merges stage B's sorted runs into
// one fully sorted, duplicate-key-merged stream of tree-ready entries.
// Runs are already individually sorted, so the merge only ever needs to
// compare each run's current head — no full re-sort.

use super::batch::Run;
use crate::tree::node::{LeafEntry, ValueEntry};
use crate::types::compare_keys;
use std::cmp::Ordering;

/// Merge sorted runs into `LeafEntry`s ready for `bulk_build`, combining
/// every run's values for a repeated key into one entry.
pub fn merge_runs(runs: Vec<Run>, case_sensitive: bool) -> Vec<LeafEntry> {
    let runs: Vec<Vec<_>> = runs.into_iter().map(|r| r.entries).collect();
    let mut cursors = vec![0usize; runs.len()];
    let mut output: Vec<LeafEntry> = Vec::new();

    loop {
        let mut min_run: Option<usize> = None;
        for (i, run) in runs.iter().enumerate() {
            if cursors[i] >= run.len() {
                continue;
            }
            match min_run {
                None => min_run = Some(i),
                Some(j) => {
                    let candidate = &run[cursors[i]].key;
                    let current = &runs[j][cursors[j]].key;
                    if compare_keys(candidate, current, case_sensitive) == Ordering::Less {
                        min_run = Some(i);
                    }
                }
            }
        }

        let Some(i) = min_run else { break };
        let entry = runs[i][cursors[i]].clone();
        cursors[i] += 1;

        match output.last_mut() {
            Some(last) if compare_keys(&last.key, &entry.key, case_sensitive) == Ordering::Equal => {
                last.values.push(ValueEntry { record_pointer: entry.record_pointer, metadata: entry.metadata });
            }
            _ => {
                output.push(LeafEntry {
                    key: entry.key,
                    values: vec![ValueEntry { record_pointer: entry.record_pointer, metadata: entry.metadata }],
                });
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BuildEntry;
    use crate::types::{RecordPointer, TypedValue};

    fn entry(k: i64, r: &str) -> BuildEntry {
        BuildEntry { key: TypedValue::Int(k), record_pointer: RecordPointer::new(vec![], r), metadata: vec![] }
    }

    #[test]
    fn merges_and_dedups_across_runs() {
        let run_a = Run { entries: vec![entry(1, "a"), entry(3, "c")], processed: false };
        let run_b = Run { entries: vec![entry(2, "b"), entry(3, "c2")], processed: false };

        let merged = merge_runs(vec![run_a, run_b], true);
        let keys: Vec<i64> = merged.iter().map(|e| match e.key { TypedValue::Int(v) => v, _ => unreachable!() }).collect();
        assert_eq!(keys, vec![1, 2, 3]);

        let three = merged.iter().find(|e| e.key == TypedValue::Int(3)).unwrap();
        assert_eq!(three.values.len(), 2);
    }
}
