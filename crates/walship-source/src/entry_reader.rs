//! Entry Readers
//!
//! An [`EntryReader`] is a stateful cursor over one WAL file: it yields
//! decoded entries and reports the byte offset just past each one, so the
//! stream above it always knows an exact resume point. Readers are cheap
//! to throw away and reopen at the last position, which is how the stream
//! releases file handles and picks up appended data.
//!
//! [`FileEntryReader`] is the reference implementation over the framing in
//! `walship_core::codec`. Other storage backends plug in through
//! [`EntryReaderFactory`].
//!
//! ## Failure contract
//!
//! - clean end of file on a frame boundary → `Ok(None)`
//! - file cut short (missing header bytes, partial frame) → `Truncated`,
//!   retryable because the writer may still be flushing
//! - bad magic, bad version, bad length, checksum mismatch, undecodable
//!   payload → `Corrupt`, fatal for this file

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader};
use walship_core::codec;
use walship_core::Entry;

/// Cursor over one WAL file.
#[async_trait]
pub trait EntryReader: Send + Sync {
    /// Decode the next entry, or `Ok(None)` at a clean end of file.
    async fn next_entry(&mut self) -> Result<Option<Entry>>;

    /// Byte offset immediately past the last decoded entry (or the file
    /// header, before any entry has been read).
    fn position(&self) -> u64;
}

/// Opens readers at a given path and byte offset. Reopening at the last
/// reported position must resume without loss or duplication.
#[async_trait]
pub trait EntryReaderFactory: Send + Sync {
    async fn open(&self, path: &Path, offset: u64) -> Result<Box<dyn EntryReader>>;
}

/// Factory for [`FileEntryReader`].
#[derive(Debug, Default)]
pub struct FileEntryReaderFactory;

#[async_trait]
impl EntryReaderFactory for FileEntryReaderFactory {
    async fn open(&self, path: &Path, offset: u64) -> Result<Box<dyn EntryReader>> {
        Ok(Box::new(FileEntryReader::open(path, offset).await?))
    }
}

/// Reads framed entries out of a WAL file on the local or shared
/// filesystem.
pub struct FileEntryReader {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
}

impl FileEntryReader {
    /// Open `path` and position the cursor at `offset`. Offset 0 means the
    /// start of the file; the cursor lands just past the validated header.
    pub async fn open(path: &Path, offset: u64) -> Result<Self> {
        let file = File::open(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path.to_owned()),
            _ => Error::Io(e),
        })?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; codec::HEADER_LEN as usize];
        let read = read_fully(&mut reader, &mut header).await?;
        if read < header.len() {
            // The writer has not flushed a full header yet. Includes the
            // zero-length file left behind by an unclean shutdown.
            return Err(Error::Truncated {
                path: path.to_owned(),
                offset: 0,
            });
        }
        codec::validate_header(&header).map_err(|e| Error::Corrupt {
            path: path.to_owned(),
            offset: 0,
            reason: e.to_string(),
        })?;

        let position = offset.max(codec::HEADER_LEN);
        if position > codec::HEADER_LEN {
            reader.seek(SeekFrom::Start(position)).await?;
        }
        Ok(Self {
            path: path.to_owned(),
            reader,
            position,
        })
    }

    fn corrupt(&self, reason: impl ToString) -> Error {
        Error::Corrupt {
            path: self.path.clone(),
            offset: self.position,
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl EntryReader for FileEntryReader {
    async fn next_entry(&mut self) -> Result<Option<Entry>> {
        let mut prefix = [0u8; codec::FRAME_PREFIX_LEN as usize];
        let read = read_fully(&mut self.reader, &mut prefix).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < prefix.len() {
            return Err(Error::Truncated {
                path: self.path.clone(),
                offset: self.position,
            });
        }

        let payload_len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        codec::validate_payload_len(payload_len).map_err(|e| self.corrupt(e))?;
        let stored_crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

        let mut payload = vec![0u8; payload_len as usize];
        let read = read_fully(&mut self.reader, &mut payload).await?;
        if read < payload.len() {
            return Err(Error::Truncated {
                path: self.path.clone(),
                offset: self.position,
            });
        }

        let entry = codec::decode_payload(&payload, stored_crc).map_err(|e| self.corrupt(e))?;
        self.position += codec::FRAME_PREFIX_LEN + payload_len as u64;
        Ok(Some(entry))
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Read until `buf` is full or the file ends; returns the bytes read.
async fn read_fully<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
