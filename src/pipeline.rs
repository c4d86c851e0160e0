//! C4: fans ingested `(key, value)` pairs out to a pool of worker threads, each of
//! which owns one [`RunGenerator`] and spills independently.
//!
//! Workers share a single bounded `crossbeam-channel` receiver (cloned per thread, as
//! the teacher's `SharedQueueThreadPool` does), so whichever worker is idle picks up
//! the next record rather than records being partitioned by key up front.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, warn};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::generator::RunGenerator;
use crate::run::RunHandle;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

enum Message<K, V> {
    Insert(K, V),
    End,
}

/// A run produced by a worker, tagged with the worker id it came from.
pub struct WorkerRun {
    pub worker_id: u32,
    pub run: RunHandle,
}

enum Mode<K, V> {
    /// `max_process == 0`: ingestion happens directly on the caller's thread.
    Inline(Box<RunGenerator<K>>, std::marker::PhantomData<V>),
    /// `max_process > 0`: a pool of worker threads sharing a dispatch channel.
    Pooled {
        sender: Sender<Message<K, V>>,
        handles: Vec<JoinHandle<Result<(u32, Vec<RunHandle>)>>>,
    },
}

/// Owns the worker pool (or single inline generator) for one ingestion session.
pub struct IngestionPipeline<K, V> {
    mode: Mode<K, V>,
    worker_count: u32,
}

impl<K, V> IngestionPipeline<K, V>
where
    K: Eq + std::hash::Hash + Ord + Serialize + Clone + Send + 'static,
    V: Serialize + Send + 'static,
{
    /// Spawns the worker pool. `first_run_ids` gives each worker id the run id it
    /// should resume from (0 for a fresh session, or continued from append metadata).
    pub fn start(
        config: &Config,
        dir: PathBuf,
        first_run_ids: &[(u32, u64)],
    ) -> Result<Self> {
        if config.max_process == 0 {
            let (worker_id, first_run_id) = first_run_ids.first().copied().unwrap_or((0, 0));
            let generator = RunGenerator::new(worker_id, dir, first_run_id, config)?;
            return Ok(IngestionPipeline {
                mode: Mode::Inline(Box::new(generator), std::marker::PhantomData),
                worker_count: 1,
            });
        }

        let (sender, receiver): (Sender<Message<K, V>>, Receiver<Message<K, V>>) =
            bounded(config.queue_max_size);

        let config_owned = config.clone();
        let mut handles = Vec::with_capacity(first_run_ids.len());
        for &(worker_id, first_run_id) in first_run_ids {
            let receiver = receiver.clone();
            let dir = dir.clone();
            let config = config_owned.clone();
            let handle = std::thread::Builder::new()
                .name(format!("disksort-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, dir, first_run_id, config, receiver))
                .map_err(Error::Io)?;
            handles.push(handle);
        }

        Ok(IngestionPipeline {
            mode: Mode::Pooled { sender, handles },
            worker_count: first_run_ids.len() as u32,
        })
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    /// Hands one record to the pool. Blocks if every worker's queue slot is full.
    pub fn insert(&mut self, key: K, value: V, config: &Config) -> Result<Option<WorkerRun>> {
        match &mut self.mode {
            Mode::Inline(generator, _) => Ok(generator
                .insert(key, &value, config)?
                .map(|run| WorkerRun {
                    worker_id: generator.worker_id(),
                    run,
                })),
            Mode::Pooled { sender, .. } => {
                sender
                    .send(Message::Insert(key, value))
                    .map_err(|_| Error::WorkerPanicked { worker_id: 0 })?;
                Ok(None)
            }
        }
    }

    /// Signals every worker to drain and spill its remaining buffer, then joins them
    /// all. Returns every run produced across the whole session.
    pub fn finish(self) -> Result<Vec<WorkerRun>> {
        match self.mode {
            Mode::Inline(generator, _) => {
                let worker_id = generator.worker_id();
                Ok(generator
                    .finish()?
                    .into_iter()
                    .map(|run| WorkerRun { worker_id, run })
                    .collect())
            }
            Mode::Pooled { sender, handles } => {
                for _ in 0..handles.len() {
                    // A full queue here means a worker panicked mid-drain; End is
                    // best-effort and join() below is what actually surfaces that.
                    let _ = sender.send(Message::End);
                }
                drop(sender);

                let mut runs = Vec::new();
                for handle in handles {
                    match handle.join() {
                        Ok(Ok((worker_id, worker_runs))) => {
                            runs.extend(
                                worker_runs
                                    .into_iter()
                                    .map(|run| WorkerRun { worker_id, run }),
                            );
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(_) => return Err(Error::WorkerPanicked { worker_id: 0 }),
                    }
                }
                Ok(runs)
            }
        }
    }
}

fn worker_loop<K, V>(
    worker_id: u32,
    dir: PathBuf,
    first_run_id: u64,
    config: Config,
    receiver: Receiver<Message<K, V>>,
) -> Result<(u32, Vec<RunHandle>)>
where
    K: Eq + std::hash::Hash + Ord + Serialize + Clone,
    V: Serialize,
{
    let mut generator = RunGenerator::new(worker_id, dir, first_run_id, &config)?;
    let mut runs = Vec::new();

    loop {
        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(Message::Insert(key, value)) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| generator.insert(key, &value, &config)));
                match outcome {
                    Ok(Ok(Some(run))) => runs.push(run),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => {
                        return Err(Error::WorkerFailed {
                            worker_id,
                            source: Box::new(e),
                        })
                    }
                    Err(_) => return Err(Error::WorkerPanicked { worker_id }),
                }
            }
            Ok(Message::End) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                warn!("worker {} lost its dispatch channel without an End message", worker_id);
                break;
            }
        }
    }

    match generator.finish() {
        Ok(Some(run)) => runs.push(run),
        Ok(None) => {}
        Err(e) => {
            error!("worker {} failed flushing its final buffer: {}", worker_id, e);
            return Err(Error::WorkerFailed {
                worker_id,
                source: Box::new(e),
            });
        }
    }

    Ok((worker_id, runs))
}
