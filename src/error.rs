use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by this crate's public API.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize a record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("device out of space while writing run data")]
    NoSpace(#[source] std::io::Error),

    #[error("{path} is not inside the run directory {root}")]
    ForeignPath { root: PathBuf, path: PathBuf },

    #[error("worker {worker_id} failed: {source}")]
    WorkerFailed {
        worker_id: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("worker {worker_id} panicked")]
    WorkerPanicked { worker_id: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
