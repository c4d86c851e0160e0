//! C7: runs a [`MergeReader`] on a dedicated background thread, feeding a bounded
//! channel so the consumer reads pre-merged records instead of paying merge latency
//! inline on every call to `next()`. Optional — only used when `iter_multiprocessing`
//! is set, mirroring the original's opt-in getter process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::merge::MergeReader;

/// A [`MergeReader`] running on its own thread, exposed as an ordinary iterator.
pub struct PrefetchReader<K, V> {
    receiver: Option<Receiver<Result<(K, V)>>>,
    handle: Option<JoinHandle<()>>,
}

impl<K, V> PrefetchReader<K, V>
where
    K: Ord + Clone + DeserializeOwned + Send + 'static,
    V: DeserializeOwned + Send + 'static,
{
    pub fn spawn(
        dir: PathBuf,
        worker_runs: BTreeMap<u32, Vec<u64>>,
        reverse: bool,
        queue_max_size: usize,
    ) -> Self {
        let (sender, receiver) = bounded(queue_max_size);

        let handle = std::thread::Builder::new()
            .name("disksort-prefetch".to_string())
            .spawn(move || {
                let reader = match MergeReader::<K, V>::open(&dir, &worker_runs, reverse) {
                    Ok(reader) => reader,
                    Err(e) => {
                        let _ = sender.send(Err(e));
                        return;
                    }
                };
                for item in reader {
                    if sender.send(item).is_err() {
                        // Consumer dropped us; no point merging further.
                        break;
                    }
                }
            })
            .expect("failed to spawn prefetch thread");

        PrefetchReader {
            receiver: Some(receiver),
            handle: Some(handle),
        }
    }
}

impl<K, V> Iterator for PrefetchReader<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref().and_then(|r| r.recv().ok())
    }
}

impl<K, V> Drop for PrefetchReader<K, V> {
    fn drop(&mut self) {
        // Drop the receiver first: if the worker is parked on a full-channel send,
        // this unblocks it immediately instead of making join() wait for the merge
        // to finish draining on its own.
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::generator::RunGenerator;

    #[test]
    fn prefetch_reader_yields_the_same_order_as_a_direct_merge() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let config = ConfigBuilder::new().count_insert_to_check(u64::MAX).build();
        let mut gen: RunGenerator<i32> = RunGenerator::new(0, root.clone(), 0, &config).unwrap();
        for (k, v) in [(3, "c"), (1, "a"), (2, "b")] {
            gen.insert(k, &v.to_string(), &config).unwrap();
        }
        gen.finish().unwrap();

        let mut worker_runs = BTreeMap::new();
        worker_runs.insert(0u32, vec![0u64]);

        let items: Vec<(i32, String)> =
            PrefetchReader::<i32, String>::spawn(root, worker_runs, false, 16)
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(
            items,
            vec![
                (1, "a".to_string()),
                (2, "b".to_string()),
                (3, "c".to_string()),
            ]
        );
    }
}
