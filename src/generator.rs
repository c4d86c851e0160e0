//! C3: a single worker's ingestion buffer and the logic that decides when to spill it.
//!
//! One [`RunGenerator`] belongs to exactly one worker (thread). It accumulates
//! `(key, value)` pairs in a `HashMap<K, Vec<u64>>` of payload offsets — sorting only
//! happens at spill time, which is what makes per-insert cost constant regardless of
//! how many keys have been seen so far.

use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::BufWriter;
use std::path::PathBuf;

use log::{debug, warn};
use serde::Serialize;

use crate::codec;
use crate::config::Config;
use crate::error::Result;
use crate::memory;
use crate::run::{PayloadWriter, RunHandle};

/// Decides, once the insert counter crosses `count_insert_to_check`, whether this is
/// actually a spill-worthy moment. The RSS probe is only consulted at that checkpoint,
/// not on every insert — querying it is comparatively expensive.
///
/// When `max_process_size` is `None`, RSS probing is disabled entirely and crossing
/// the counter alone spills. When a limit is set, the checkpoint spills if RSS is
/// unavailable *or* above the limit; if RSS is available and at or under the limit,
/// the buffer keeps growing and the counter simply resets for the next checkpoint.
/// This is the evident intent behind the original's `process_memory == -1 is None or
/// max_process_size < process_memory` — a comparison-chaining accident that always
/// evaluates its first half to `False`, leaving the RSS comparison to run against a
/// size value that may be `None` at all (silently caught further up the call stack).
fn should_spill_at_checkpoint(config: &Config, worker_id: u32) -> bool {
    match config.max_process_size {
        None => true,
        Some(limit) => match memory::current_rss() {
            None => {
                warn!(
                    "worker {} could not read its own RSS; spilling on the insert counter alone",
                    worker_id
                );
                true
            }
            Some(rss) => rss > limit,
        },
    }
}

/// Accumulates inserts for one worker and spills them into numbered run files.
pub struct RunGenerator<K> {
    worker_id: u32,
    dir: PathBuf,
    buffer: HashMap<K, Vec<u64>>,
    payload: PayloadWriter,
    inserts_since_spill: u64,
    next_run_id: u64,
    ensure_space: bool,
    reverse: bool,
}

impl<K> RunGenerator<K>
where
    K: Eq + Hash + Ord + Serialize + Clone,
{
    pub fn new(worker_id: u32, dir: PathBuf, first_run_id: u64, config: &Config) -> Result<Self> {
        let payload_path = dir.join(format!("full_data_{}.db", worker_id));
        let payload = PayloadWriter::create_new(&payload_path)?;
        Ok(RunGenerator {
            worker_id,
            dir,
            buffer: HashMap::new(),
            payload,
            inserts_since_spill: 0,
            next_run_id: first_run_id,
            ensure_space: config.ensure_space,
            reverse: config.reverse,
        })
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Buffers one `(key, value)` pair, writing the value to the payload file
    /// immediately but deferring sort order until the buffer spills.
    ///
    /// Returns `Some(RunHandle)` if this insert tripped a spill.
    pub fn insert<V: Serialize>(
        &mut self,
        key: K,
        value: &V,
        config: &Config,
    ) -> Result<Option<RunHandle>> {
        let offset = self.payload.write_record(value, self.ensure_space)?;
        self.buffer.entry(key).or_insert_with(Vec::new).push(offset);
        self.inserts_since_spill += 1;

        if self.inserts_since_spill > config.count_insert_to_check {
            self.inserts_since_spill = 0;
            if should_spill_at_checkpoint(config, self.worker_id) {
                return Ok(Some(self.spill()?));
            }
        }
        Ok(None)
    }

    /// Sorts the buffer and writes it out as a new index file, resetting the buffer.
    ///
    /// Sorted in the session's merge direction (descending if `reverse`), not always
    /// ascending: each index file must already be monotone in that direction on its own,
    /// since the merge reader replays it sequentially and never re-sorts within a source.
    pub fn spill(&mut self) -> Result<RunHandle> {
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let mut entries: Vec<(K, Vec<u64>)> = self.buffer.drain().collect();
        if self.reverse {
            entries.sort_by(|a, b| b.0.cmp(&a.0));
        } else {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let key_count = entries.len();
        let index_path = self
            .dir
            .join(format!("keys_sorted_{}_{}.db", self.worker_id, run_id));
        let mut writer = BufWriter::new(File::create(&index_path)?);
        codec::write_index_entries(&mut writer, entries)?;

        debug!(
            "worker {} spilled run {} ({} distinct keys)",
            self.worker_id, run_id, key_count
        );
        self.inserts_since_spill = 0;
        Ok(RunHandle { run_id, index_path })
    }

    /// Spills whatever remains in the buffer, if anything. Called at end-of-input.
    ///
    /// If this worker produced no runs at all, the payload file is empty dead weight
    /// and is removed rather than left behind for the merge reader to skip over.
    pub fn finish(mut self) -> Result<Option<RunHandle>> {
        if self.buffer.is_empty() {
            debug!("worker {} finished with an empty buffer", self.worker_id);
            if self.payload.position() == 0 {
                let payload_path = self.dir.join(format!("full_data_{}.db", self.worker_id));
                drop(self.payload);
                if let Err(e) = std::fs::remove_file(&payload_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
            }
            return Ok(None);
        }
        Ok(Some(self.spill()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    #[test]
    fn spills_when_insert_count_threshold_is_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigBuilder::new()
            .count_insert_to_check(3)
            .max_process_size(None)
            .build();
        let mut gen: RunGenerator<String> =
            RunGenerator::new(0, dir.path().to_path_buf(), 0, &config).unwrap();

        assert!(gen.insert("b".to_string(), &"vb", &config).unwrap().is_none());
        assert!(gen.insert("a".to_string(), &"va", &config).unwrap().is_none());
        assert!(gen.insert("c".to_string(), &"vc", &config).unwrap().is_none());
        let run = gen.insert("d".to_string(), &"vd", &config).unwrap();
        assert!(run.is_some());
        assert_eq!(run.unwrap().run_id, 0);
    }

    #[test]
    fn finish_flushes_a_partial_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigBuilder::new().count_insert_to_check(1_000).build();
        let mut gen: RunGenerator<String> =
            RunGenerator::new(0, dir.path().to_path_buf(), 0, &config).unwrap();
        gen.insert("a".to_string(), &"va", &config).unwrap();
        let run = gen.finish().unwrap();
        assert!(run.is_some());
    }

    #[test]
    fn finish_on_an_empty_buffer_produces_no_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigBuilder::new().build();
        let gen: RunGenerator<String> =
            RunGenerator::new(0, dir.path().to_path_buf(), 0, &config).unwrap();
        assert!(gen.finish().unwrap().is_none());
    }

    #[test]
    fn finish_on_an_empty_buffer_deletes_the_unused_payload_file() {
        let dir = tempfile::tempdir().unwrap();
        let payload_path = dir.path().join("full_data_0.db");
        let config = ConfigBuilder::new().build();
        let gen: RunGenerator<String> =
            RunGenerator::new(0, dir.path().to_path_buf(), 0, &config).unwrap();
        assert!(payload_path.exists());
        assert!(gen.finish().unwrap().is_none());
        assert!(!payload_path.exists());
    }
}
