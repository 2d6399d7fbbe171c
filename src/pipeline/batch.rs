// Stage B: batch + sort (spec §4.5). Reads the build file back in
// `max_values_per_batch`-sized chunks and sorts each chunk in memory by
// key, producing one sorted run per chunk. Each run tracks a
// `processed` flag so a resumed build can skip runs stage C already
// consumed.

use super::{read_all_framed, write_framed_entry, BuildEntry};
use crate::config::IndexEngineConfig;
use crate::error::Result;
use crate::io::{MemoryWriter, ReadSource};
use crate::types::compare_keys;

pub struct Run {
    pub entries: Vec<BuildEntry>,
    pub processed: bool,
}

/// Split the spilled build file into sorted runs of at most
/// `cfg.max_values_per_batch` entries each.
pub async fn batch_sort(build_file: &mut dyn ReadSource, cfg: &IndexEngineConfig, case_sensitive: bool) -> Result<Vec<Run>> {
    let all = read_all_framed(build_file).await?;
    let mut runs = Vec::new();
    for chunk in all.chunks(cfg.max_values_per_batch.max(1)) {
        let mut entries = chunk.to_vec();
        entries.sort_by(|a, b| compare_keys(&a.key, &b.key, case_sensitive));
        runs.push(Run { entries, processed: false });
    }
    Ok(runs)
}

/// Materialize one run as a length-framed byte buffer, e.g. for spilling
/// it to its own file instead of holding it resident.
pub async fn encode_run(run: &Run) -> Result<Vec<u8>> {
    let mut sink = MemoryWriter::new();
    for entry in &run.entries {
        write_framed_entry(&mut sink, entry).await?;
    }
    Ok(sink.buf)
}
