//! C2: the on-disk representation of one sorted run — a payload file (append-only,
//! addressed by byte offset) and an index file (sorted `(key, [offsets])` entries).
//!
//! `PayloadWriter`/`PayloadReader` are position-tracking wrappers modeled directly on
//! the teacher's `BufWriterWithPos`/`BufReaderWithPos` (`engine/kvs.rs`).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use log::error;
use serde::Serialize;

use crate::codec;
use crate::error::{Error, Result};

/// Append-only writer over a worker's payload file, tracking the current end-of-file
/// offset so callers don't need a separate `seek` round-trip per write.
pub struct PayloadWriter {
    writer: BufWriter<File>,
    pos: u64,
}

impl PayloadWriter {
    pub fn create_new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::from_file(file)
    }

    fn from_file(mut file: File) -> Result<Self> {
        let pos = file.seek(SeekFrom::End(0))?;
        Ok(PayloadWriter {
            writer: BufWriter::new(file),
            pos,
        })
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Writes one length-prefixed record, retrying on ENOSPC with linear backoff when
    /// `ensure_space` is set. Returns the offset the record was written at.
    pub fn write_record<T: Serialize>(&mut self, value: &T, ensure_space: bool) -> Result<u64> {
        let start = self.pos;
        let mut attempt: u32 = 0;
        loop {
            match codec::write_record(&mut self.writer, value) {
                Ok(written) => {
                    self.pos += written;
                    self.writer.flush()?;
                    return Ok(start);
                }
                Err(Error::Io(io_err)) if io_err.raw_os_error() == Some(libc_enospc()) => {
                    if !ensure_space {
                        return Err(Error::NoSpace(io_err));
                    }
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * attempt as u64);
                    error!(
                        "no space left on device writing run payload, retrying in {:?} (attempt {})",
                        backoff, attempt
                    );
                    sleep(backoff);
                }
                Err(other) => return Err(other),
            }
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Random-access reader over a worker's payload file.
pub struct PayloadReader {
    file: File,
}

impl PayloadReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(PayloadReader {
            file: File::open(path)?,
        })
    }

    /// Reads the one record at `offset`, via the C1 codec's random-access op.
    pub fn read_record_at<T: serde::de::DeserializeOwned>(&mut self, offset: u64) -> Result<T> {
        codec::read_record_at(&mut self.file, offset)
    }
}

impl Read for PayloadReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

/// One worker's produced run: the index file that resulted from a single `spill()`.
#[derive(Clone, Debug)]
pub struct RunHandle {
    pub run_id: u64,
    pub index_path: PathBuf,
}

#[cfg(unix)]
fn libc_enospc() -> i32 {
    28 // ENOSPC
}

#[cfg(not(unix))]
fn libc_enospc() -> i32 {
    112 // ERROR_DISK_FULL-ish sentinel; non-unix targets are not a primary target here.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reports_increasing_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("full_data_0.db");
        let mut writer = PayloadWriter::create_new(&path).unwrap();
        let p0 = writer.write_record(&"valA".to_string(), false).unwrap();
        let p1 = writer.write_record(&"valB".to_string(), false).unwrap();
        assert_eq!(p0, 0);
        assert!(p1 > p0);
        drop(writer);

        let mut reader = PayloadReader::open(&path).unwrap();
        let v0: String = reader.read_record_at(p0).unwrap();
        let v1: String = reader.read_record_at(p1).unwrap();
        assert_eq!(v0, "valA");
        assert_eq!(v1, "valB");
    }
}
