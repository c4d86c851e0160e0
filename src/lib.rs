//! External-memory sort: spill a key-sorted stream to disk under a bounded memory
//! ceiling, then read it back as one globally sorted sequence.
//!
//! The entry point is [`SortedInDisk`]: build one with [`Config`]/[`ConfigBuilder`],
//! feed it records with [`SortedInDisk::ingest`], then consume the sorted result with
//! [`SortedInDisk::items`], [`SortedInDisk::keys`], [`SortedInDisk::values`].

pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod generator;
pub mod memory;
pub mod merge;
pub mod pipeline;
pub mod prefetch;
pub mod run;

pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};

use std::marker::PhantomData;
use std::path::PathBuf;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use directory::{RunDirectory, SessionMetadata};
use pipeline::IngestionPipeline;
use prefetch::PrefetchReader;

/// One sorting session: owns a run directory, an optional in-flight ingestion
/// pipeline, and the accumulated metadata describing every run produced so far.
pub struct SortedInDisk<K, V> {
    config: Config,
    dir: RunDirectory,
    metadata: SessionMetadata,
    pipeline: Option<IngestionPipeline<K, V>>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> SortedInDisk<K, V>
where
    K: Eq + std::hash::Hash + Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    /// Opens (or creates) the session directory named by `config.tmp_dir`. If
    /// `append` is not set, any pre-existing contents are cleared first.
    pub fn new(mut config: Config) -> Result<Self> {
        let dir = RunDirectory::open(
            &config.tmp_dir,
            config.append,
            config.ensure_different_dirs,
        )?;
        if !config.append {
            dir.clear()?;
            std::fs::create_dir_all(dir.root())?;
        }
        let mut metadata = dir.load_metadata()?;
        debug!(
            "opened session at {} ({} workers known from prior metadata)",
            dir.root().display(),
            metadata.workers.len()
        );

        match metadata.reverse {
            // Existing runs on disk are already sorted one way; an append session
            // must keep spilling in that same direction or I1 breaks.
            Some(existing) if !metadata.is_empty() && existing != config.reverse => {
                warn!(
                    "session at {} was built with reverse={}, ignoring the conflicting \
                     reverse={} requested for this append",
                    dir.root().display(),
                    existing,
                    config.reverse
                );
                config.reverse = existing;
            }
            _ => metadata.reverse = Some(config.reverse),
        }

        Ok(SortedInDisk {
            config,
            dir,
            metadata,
            pipeline: None,
            _marker: PhantomData,
        })
    }

    /// Ingests one `(key, value)` pair, starting the worker pool on first use.
    pub fn ingest(&mut self, key: K, value: V) -> Result<()> {
        if self.pipeline.is_none() {
            self.start_pipeline()?;
        }
        let config = self.config.clone();
        let worker_run = self.pipeline.as_mut().unwrap().insert(key, value, &config)?;
        if let Some(worker_run) = worker_run {
            self.metadata.record_run(worker_run.worker_id, &worker_run.run);
        }
        Ok(())
    }

    fn start_pipeline(&mut self) -> Result<()> {
        let worker_count = if self.config.max_process == 0 {
            1
        } else {
            self.config.max_process
        };
        let first_run_ids: Vec<(u32, u64)> = (0..worker_count)
            .map(|id| (id, self.metadata.next_run_id(id)))
            .collect();
        let pipeline =
            IngestionPipeline::start(&self.config, self.dir.root().to_path_buf(), &first_run_ids)?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// Waits for all worker threads to finish and folds their produced runs into
    /// the session metadata. Idempotent: a second call is a no-op.
    pub fn join(&mut self) -> Result<()> {
        if let Some(pipeline) = self.pipeline.take() {
            let worker_runs = pipeline.finish()?;
            for worker_run in worker_runs {
                self.metadata.record_run(worker_run.worker_id, &worker_run.run);
            }
            self.dir.save_metadata(&self.metadata)?;
        }
        Ok(())
    }

    /// Total number of records ingested so far (forces a `join`).
    pub fn len(&mut self) -> Result<u64> {
        self.join()?;
        self.count_records()
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn count_records(&self) -> Result<u64> {
        let mut total = 0u64;
        for (&worker_id, meta) in &self.metadata.workers {
            for &run_id in &meta.run_ids {
                let index_path = self
                    .dir
                    .root()
                    .join(format!("keys_sorted_{}_{}.db", worker_id, run_id));
                let reader: codec::IndexReader<K> = codec::IndexReader::open(&index_path)?;
                for entry in reader {
                    let (_, offsets) = entry?;
                    total += offsets.len() as u64;
                }
            }
        }
        Ok(total)
    }

    /// Deletes the session's temp directory. Safe to call more than once.
    pub fn clear(&mut self) -> Result<()> {
        self.pipeline = None;
        self.metadata = SessionMetadata::default();
        self.dir.clear()
    }

    /// A sorted `(key, value)` iterator over everything ingested so far. Forces a
    /// `join` first. If `only_one_read` is set, the session directory is deleted
    /// once this iterator is fully drained.
    pub fn items(&mut self) -> Result<SortedItems<K, V>> {
        self.join()?;
        let reverse = self.config.reverse;
        let worker_runs: std::collections::BTreeMap<u32, Vec<u64>> = self
            .metadata
            .workers
            .iter()
            .map(|(&id, meta)| (id, meta.run_ids.clone()))
            .collect();

        let source = if self.config.iter_multiprocessing {
            ItemsSource::Prefetch(PrefetchReader::spawn(
                self.dir.root().to_path_buf(),
                worker_runs,
                reverse,
                self.config.iter_m_queue_max_size,
            ))
        } else {
            ItemsSource::Direct(merge::MergeReader::open(self.dir.root(), &worker_runs, reverse)?)
        };

        Ok(SortedItems {
            source,
            cleanup: if self.config.only_one_read {
                Some(self.dir.root().to_path_buf())
            } else {
                None
            },
            done: false,
        })
    }

    /// Sorted values only, discarding keys.
    pub fn values(&mut self) -> Result<impl Iterator<Item = Result<V>>> {
        Ok(self.items()?.map(|item| item.map(|(_, v)| v)))
    }

    /// Sorted keys only, discarding values.
    pub fn keys(&mut self) -> Result<impl Iterator<Item = Result<K>>> {
        Ok(self.items()?.map(|item| item.map(|(k, _)| k)))
    }
}

enum ItemsSource<K, V> {
    Direct(merge::MergeReader<K, V>),
    Prefetch(PrefetchReader<K, V>),
}

impl<K, V> Iterator for ItemsSource<K, V>
where
    K: Ord + Clone + DeserializeOwned,
    V: DeserializeOwned,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ItemsSource::Direct(reader) => reader.next(),
            ItemsSource::Prefetch(reader) => reader.next(),
        }
    }
}

/// Iterator returned by [`SortedInDisk::items`]. Deletes the session directory on
/// full consumption when the session was configured `only_one_read`.
pub struct SortedItems<K, V> {
    source: ItemsSource<K, V>,
    cleanup: Option<PathBuf>,
    done: bool,
}

impl<K, V> Iterator for SortedItems<K, V>
where
    K: Ord + Clone + DeserializeOwned,
    V: DeserializeOwned,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next() {
            Some(item) => Some(item),
            None => {
                self.done = true;
                if let Some(root) = self.cleanup.take() {
                    if root.exists() {
                        if let Err(e) = std::fs::remove_dir_all(&root) {
                            return Some(Err(e.into()));
                        }
                    }
                }
                None
            }
        }
    }
}

/// Convenience entry point mirroring the caller-facing shorthand: open a session
/// with `config`, ingest `records` with the given key extractor, and return the
/// session ready to be read from.
pub fn sorted_in_disk<K, V, R>(
    config: Config,
    records: impl IntoIterator<Item = R>,
    mut key_fn: impl FnMut(&R) -> K,
) -> Result<SortedInDisk<K, V>>
where
    K: Eq + std::hash::Hash + Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
    R: Into<V>,
{
    let mut session = SortedInDisk::new(config)?;
    for record in records {
        let key = key_fn(&record);
        session.ingest(key, record.into())?;
    }
    Ok(session)
}
