//! C6: the run directory manager — allocates a session's temp directory, persists
//! its metadata so an `append` session can pick up where a previous one left off, and
//! deletes runs (or the whole directory) without ever unlinking outside its own root.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::run::RunHandle;

const METADATA_FILE: &str = "dict_info.db";

/// One worker's accumulated runs, as recorded in the session metadata file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerMeta {
    pub worker_id: u32,
    pub run_ids: Vec<u64>,
}

/// Everything needed to resume a session against an existing directory: which
/// worker ids are in use and the next run id to allocate for each, plus the sort
/// direction every run on disk was spilled under.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub workers: BTreeMap<u32, WorkerMeta>,
    /// `None` until the first run is recorded; fixes the direction every later
    /// `append` session must agree with (I1: index files are only monotone if every
    /// spill sorted them the same way).
    pub reverse: Option<bool>,
}

impl SessionMetadata {
    pub fn is_empty(&self) -> bool {
        self.workers.values().all(|w| w.run_ids.is_empty())
    }

    pub fn next_run_id(&self, worker_id: u32) -> u64 {
        self.workers
            .get(&worker_id)
            .and_then(|w| w.run_ids.iter().max())
            .map(|id| id + 1)
            .unwrap_or(0)
    }

    pub fn record_run(&mut self, worker_id: u32, run: &RunHandle) {
        self.workers
            .entry(worker_id)
            .or_insert_with(|| WorkerMeta {
                worker_id,
                run_ids: Vec::new(),
            })
            .run_ids
            .push(run.run_id);
    }

    fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Owns one session's directory on disk: allocation, metadata persistence, and
/// deletion, all scoped to a single root path.
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Allocates (or reopens, in `append` mode) the session directory.
    ///
    /// When `ensure_different_dirs` is set and `tmp_dir` already exists, tries
    /// `tmp_dir(1)`, `tmp_dir(2)`, ... until a free name is found, mirroring the
    /// original's directory-collision handling for concurrent sessions sharing a
    /// base path.
    pub fn open(tmp_dir: &Path, append: bool, ensure_different_dirs: bool) -> Result<Self> {
        if append {
            fs::create_dir_all(tmp_dir)?;
            return Ok(RunDirectory {
                root: tmp_dir.to_path_buf(),
            });
        }

        if !ensure_different_dirs {
            fs::create_dir_all(tmp_dir)?;
            return Ok(RunDirectory {
                root: tmp_dir.to_path_buf(),
            });
        }

        let mut candidate = tmp_dir.to_path_buf();
        let mut suffix = 0u32;
        loop {
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(RunDirectory { root: candidate }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    suffix += 1;
                    let name = format!(
                        "{}({})",
                        tmp_dir.file_name().and_then(|n| n.to_str()).unwrap_or("tmp"),
                        suffix
                    );
                    candidate = tmp_dir.with_file_name(name);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn worker_payload_path(&self, worker_id: u32) -> PathBuf {
        self.root.join(format!("full_data_{}.db", worker_id))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    /// Loads the previously-saved metadata, if this directory has any (an `append`
    /// session reusing a prior directory). Returns an empty metadata set otherwise.
    pub fn load_metadata(&self) -> Result<SessionMetadata> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(SessionMetadata::default());
        }
        SessionMetadata::load(&path)
    }

    /// Writes metadata atomically: serialize to a sibling temp file, then rename
    /// over the real path so a crash mid-write never leaves a truncated file behind.
    pub fn save_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        let tmp_path = self.root.join(format!("{}.tmp", METADATA_FILE));
        {
            let writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer(writer, metadata)?;
        }
        fs::rename(&tmp_path, self.metadata_path())?;
        Ok(())
    }

    /// Deletes the entire session directory. Refuses to act on any path that does
    /// not resolve inside this directory's root.
    pub fn clear(&self) -> Result<()> {
        self.check_contains(&self.root)?;
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }

    fn check_contains(&self, path: &Path) -> Result<()> {
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let resolved = path
            .parent()
            .and_then(|p| p.canonicalize().ok())
            .unwrap_or_else(|| path.to_path_buf());
        if !resolved.starts_with(&root) && resolved != root {
            return Err(Error::ForeignPath {
                root,
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}
