//! Durable resume positions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A durable resume point: a WAL file plus a byte offset within it.
///
/// The offset always sits on a record boundary: immediately after a frame,
/// or at the end of the file header. The coordination layer persists these
/// and hands them back as the starting point after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// WAL file on the shared filesystem.
    pub path: PathBuf,
    /// Byte offset within the file.
    pub offset: u64,
}

impl Position {
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path.display(), self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_path_and_offset() {
        assert_eq!(Position::new("a.wal", 8), Position::new("a.wal", 8));
        assert_ne!(Position::new("a.wal", 8), Position::new("a.wal", 9));
        assert_ne!(Position::new("a.wal", 8), Position::new("b.wal", 8));
    }

    #[test]
    fn test_display() {
        assert_eq!(Position::new("a.wal", 8).to_string(), "a.wal@8");
    }
}
