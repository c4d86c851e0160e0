//! Length-prefixed record framing: the "opaque binary codec" external collaborator,
//! generalized from a single `TcpStream` request/response pair (see the teacher's
//! `common.rs::handle_send`/`handle_receive`) to random-access files keyed by byte offset.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Appends one length-prefixed, `serde_json`-encoded record to `writer`.
///
/// Returns the number of bytes written, including the 8-byte length prefix.
pub fn write_record<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<u64> {
    let body = serde_json::to_vec(value)?;
    writer.write_all(&(body.len() as u64).to_be_bytes())?;
    writer.write_all(&body)?;
    Ok(8 + body.len() as u64)
}

/// Reads back one length-prefixed record starting at the current position of `reader`.
pub fn read_record<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf)?;
    let len = u64::from_be_bytes(len_buf);
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Reads back one length-prefixed record starting at byte offset `offset` in `file`.
pub fn read_record_at<T: DeserializeOwned>(file: &mut File, offset: u64) -> Result<T> {
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(file);
    read_record(&mut reader)
}

/// Bulk form: writes a lazily-produced sequence of `(key, offsets)` pairs into a brand
/// new index file. Consumes the iterator fully and returns the number of entries written.
pub fn write_index_entries<W, K, I>(writer: &mut W, entries: I) -> Result<u64>
where
    W: Write,
    K: Serialize,
    I: IntoIterator<Item = (K, Vec<u64>)>,
{
    let mut count = 0;
    for (key, offsets) in entries {
        write_record(writer, &(key, offsets))?;
        count += 1;
    }
    Ok(count)
}

/// Sequential reader over an index file's `(key, offsets)` entries, produced by
/// [`write_index_entries`].
pub struct IndexReader<K> {
    reader: BufReader<File>,
    _marker: std::marker::PhantomData<K>,
}

impl<K: DeserializeOwned> IndexReader<K> {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(IndexReader {
            reader: BufReader::new(File::open(path)?),
            _marker: std::marker::PhantomData,
        })
    }
}

impl<K: DeserializeOwned> Iterator for IndexReader<K> {
    type Item = Result<(K, Vec<u64>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut len_buf = [0u8; 8];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        let len = u64::from_be_bytes(len_buf);
        let mut body = vec![0u8; len as usize];
        if let Err(e) = self.reader.read_exact(&mut body) {
            return Some(Err(e.into()));
        }
        Some(serde_json::from_slice(&body).map_err(Into::into))
    }
}
