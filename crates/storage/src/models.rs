//! Storage models.

use std::fs::Metadata;
use std::path::PathBuf;
use time::OffsetDateTime;

use crate::StorageLocation;
use crate::error::{ErrorKind, Result};

/// Metadata about a single node, whichever backend it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Display name of the node (the last path segment)
    pub name: String,
    /// Size in bytes; always zero for directories
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
    pub is_dir: bool,
}
impl Stat {
    pub fn file(name: impl Into<String>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self { name: name.into(), size, modified: modified.into(), is_dir: false }
    }

    pub fn directory(name: impl Into<String>, modified: impl Into<OffsetDateTime>) -> Self {
        Self { name: name.into(), size: 0, modified: modified.into(), is_dir: true }
    }

    /// Re-use same data collection from filesystem metadata for every backend
    /// that sits on top of a real filesystem.
    pub(crate) fn from_metadata(name: impl Into<String>, metadata: &Metadata) -> Result<Self> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(match metadata.is_dir() {
            true => Self::directory(name, modified),
            false => Self::file(name, metadata.len(), modified),
        })
    }
}

/// One node found while walking a directory tree.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path relative to the directory the walk started from
    pub relative: PathBuf,
    pub location: StorageLocation,
    pub stat: Stat,
}
