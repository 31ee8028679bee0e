//! WAL Record Framing
//!
//! Reference binary layout for the WAL files the replication source tails.
//! The format is owned by the write path; this module is the shared codec
//! both sides agree on.
//!
//! ## File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (8 bytes)                            │
//! │ - Magic bytes: "WSHP" (4 bytes)             │
//! │ - Version: 1 (2 bytes, LE)                  │
//! │ - Reserved (2 bytes)                        │
//! ├─────────────────────────────────────────────┤
//! │ Frame 1                                     │
//! │ - Payload size (4 bytes, LE)                │
//! │ - CRC32 of payload (4 bytes, LE)            │
//! │ - Payload (JSON-encoded Entry)              │
//! ├─────────────────────────────────────────────┤
//! │ Frame 2 ...                                 │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! A file that ends exactly on a frame boundary is cleanly closed. A file
//! that ends inside the header or inside a frame was cut short; whether
//! that means "writer still flushing" or "writer died" is the tailing
//! reader's call, not the codec's.

use crate::entry::Entry;
use thiserror::Error;

/// Magic bytes at the start of every WAL file.
pub const MAGIC: &[u8; 4] = b"WSHP";

/// Current format version.
pub const VERSION: u16 = 1;

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 8;

/// Size of a frame prefix (payload length + CRC32) in bytes.
pub const FRAME_PREFIX_LEN: u64 = 8;

/// Upper bound on a single frame payload. Anything larger is corruption,
/// not a legitimate record.
pub const MAX_PAYLOAD_LEN: u32 = 256 * 1024 * 1024;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad wal file magic")]
    BadMagic,

    #[error("unsupported wal format version {0}")]
    UnsupportedVersion(u16),

    #[error("frame payload length {0} out of range")]
    PayloadLength(u32),

    #[error("frame checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("entry payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The 8-byte header written at the start of every WAL file.
pub fn file_header() -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header
}

/// Validate a WAL file header.
pub fn validate_header(header: &[u8; HEADER_LEN as usize]) -> Result<()> {
    if &header[..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Encode one entry as a framed record ready to append to a WAL file.
pub fn encode_entry(entry: &Entry) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(entry)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN as usize + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Validate the declared payload length of a frame.
pub fn validate_payload_len(len: u32) -> Result<()> {
    if len == 0 || len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadLength(len));
    }
    Ok(())
}

/// Decode a frame payload after its CRC has been read off the wire.
pub fn decode_payload(payload: &[u8], stored_crc: u32) -> Result<Entry> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    let computed = hasher.finalize();
    if computed != stored_crc {
        return Err(CodecError::ChecksumMismatch {
            stored: stored_crc,
            computed,
        });
    }
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Cell, EntryKey, WalEdit};

    fn entry(row: &str) -> Entry {
        Entry::new(
            EntryKey::new("t", 42),
            WalEdit::with_cells(vec![Cell::new(row.to_owned(), "info", "q", "v", 1)]),
        )
    }

    #[test]
    fn test_header_roundtrip() {
        let header = file_header();
        validate_header(&header).unwrap();
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut header = file_header();
        header[0] = b'X';
        assert!(matches!(
            validate_header(&header),
            Err(CodecError::BadMagic)
        ));
    }

    #[test]
    fn test_header_rejects_future_version() {
        let mut header = file_header();
        header[4..6].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(
            validate_header(&header),
            Err(CodecError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_frame_roundtrip() {
        let e = entry("a");
        let frame = encode_entry(&e).unwrap();
        let len = u32::from_le_bytes(frame[..4].try_into().unwrap());
        let crc = u32::from_le_bytes(frame[4..8].try_into().unwrap());
        validate_payload_len(len).unwrap();
        let decoded = decode_payload(&frame[8..], crc).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn test_decode_rejects_flipped_bit() {
        let e = entry("a");
        let mut frame = encode_entry(&e).unwrap();
        let crc = u32::from_le_bytes(frame[4..8].try_into().unwrap());
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(matches!(
            decode_payload(&frame[8..], crc),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_payload_len_is_invalid() {
        assert!(validate_payload_len(0).is_err());
        assert!(validate_payload_len(MAX_PAYLOAD_LEN + 1).is_err());
        assert!(validate_payload_len(1).is_ok());
    }
}
