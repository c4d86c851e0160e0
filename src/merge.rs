//! C5: the k-way merge reader that turns a session's run files back into one
//! globally sorted stream.
//!
//! The frontier is a sorted `Vec`, not a heap: after advancing the current front
//! entry, only a single comparison against the new second element decides whether a
//! full re-sort is needed. With one run per worker in the common case this keeps
//! the steady-state cost at one comparison per record instead of `log(n)` heap
//! operations — the same tradeoff the implementation this was ported from makes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::de::DeserializeOwned;

use crate::codec::IndexReader;
use crate::error::Result;
use crate::run::PayloadReader;

struct FrontierEntry<K> {
    key: K,
    offsets: Vec<u64>,
    source: usize,
}

struct RunSource<K> {
    index: IndexReader<K>,
    payload: Rc<RefCell<PayloadReader>>,
}

/// Merges every run belonging to one session into a single sorted sequence.
pub struct MergeReader<K, V> {
    frontier: Vec<FrontierEntry<K>>,
    sources: Vec<RunSource<K>>,
    reverse: bool,
    pending_key: Option<K>,
    pending_source: usize,
    pending_offsets: std::collections::VecDeque<u64>,
    _marker: std::marker::PhantomData<V>,
}

impl<K, V> MergeReader<K, V>
where
    K: Ord + Clone + DeserializeOwned,
    V: DeserializeOwned,
{
    /// `worker_runs` maps each worker id to its run ids, in the order they were
    /// produced; `dir` is the session's run directory.
    pub fn open(dir: &Path, worker_runs: &BTreeMap<u32, Vec<u64>>, reverse: bool) -> Result<Self> {
        let mut sources = Vec::new();
        let mut frontier = Vec::new();

        for (&worker_id, run_ids) in worker_runs {
            if run_ids.is_empty() {
                continue;
            }
            let payload_path = dir.join(format!("full_data_{}.db", worker_id));
            let payload = Rc::new(RefCell::new(PayloadReader::open(&payload_path)?));

            for &run_id in run_ids {
                let index_path = dir.join(format!("keys_sorted_{}_{}.db", worker_id, run_id));
                let mut index = IndexReader::open(&index_path)?;
                let source_idx = sources.len();
                if let Some(first) = index.next() {
                    let (key, offsets) = first?;
                    frontier.push(FrontierEntry {
                        key,
                        offsets,
                        source: source_idx,
                    });
                }
                sources.push(RunSource {
                    index,
                    payload: Rc::clone(&payload),
                });
            }
        }

        sort_frontier(&mut frontier, reverse);

        Ok(MergeReader {
            frontier,
            sources,
            reverse,
            pending_key: None,
            pending_source: 0,
            pending_offsets: std::collections::VecDeque::new(),
            _marker: std::marker::PhantomData,
        })
    }

    fn read_value(&self, source: usize, offset: u64) -> Result<V> {
        self.sources[source]
            .payload
            .borrow_mut()
            .read_record_at(offset)
    }

    /// Pops the new front of the frontier, advances its underlying index reader, and
    /// re-threads the result back into the frontier (or drops the exhausted source).
    fn advance_front(&mut self) -> Result<()> {
        let FrontierEntry { key, offsets, source } = self.frontier.remove(0);
        self.pending_key = Some(key);
        self.pending_source = source;
        self.pending_offsets = offsets.into();

        let next_entry = match self.sources[source].index.next() {
            Some(res) => Some(res?),
            None => None,
        };

        match next_entry {
            None => {
                // This source is exhausted; its payload `Rc` drops once every run
                // sharing the same worker's file has gone the same way.
            }
            Some((key, offsets)) => {
                self.frontier.insert(
                    0,
                    FrontierEntry {
                        key,
                        offsets,
                        source,
                    },
                );
                if self.frontier.len() > 1 {
                    let front_violates = if self.reverse {
                        self.frontier[0].key < self.frontier[1].key
                    } else {
                        self.frontier[0].key > self.frontier[1].key
                    };
                    if front_violates {
                        sort_frontier(&mut self.frontier, self.reverse);
                    }
                }
            }
        }
        Ok(())
    }
}

fn sort_frontier<K: Ord>(frontier: &mut [FrontierEntry<K>], reverse: bool) {
    if reverse {
        frontier.sort_by(|a, b| b.key.cmp(&a.key));
    } else {
        frontier.sort_by(|a, b| a.key.cmp(&b.key));
    }
}

impl<K, V> Iterator for MergeReader<K, V>
where
    K: Ord + Clone + DeserializeOwned,
    V: DeserializeOwned,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(offset) = self.pending_offsets.pop_front() {
                let key = self.pending_key.clone().expect("pending_key set with pending_offsets");
                return Some(self.read_value(self.pending_source, offset).map(|v| (key, v)));
            }
            self.pending_key = None;
            if self.frontier.is_empty() {
                return None;
            }
            if let Err(e) = self.advance_front() {
                return Some(Err(e));
            }
        }
    }
}
