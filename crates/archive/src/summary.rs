//! Size accounting straight from an archive's central directory.

use crate::entry::{EntryKind, classify, normalize_entry_name};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{Read, Seek};
use tracing::instrument;
use zip::ZipArchive;

/// One file entry of an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntrySummary {
    /// Normalized entry name
    pub name: String,
    pub kind: EntryKind,
    /// Uncompressed size in bytes
    pub size: u64,
}

/// What an archive contains, broken down by [`EntryKind`].
///
/// Directory entries are not listed. Nothing is decompressed to build this.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: Vec<EntrySummary>,
    pub data_bytes: u64,
    pub obb_bytes: u64,
    pub package_bytes: u64,
}

impl ArchiveSummary {
    #[instrument(level = "debug", skip_all)]
    pub fn read<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader).or_raise(|| ErrorKind::InvalidArchive)?;
        let mut summary = Self::default();
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).or_raise(|| ErrorKind::InvalidArchive)?;
            if file.is_dir() {
                continue;
            }
            let name = normalize_entry_name(file.name());
            let kind = classify(&name);
            let size = file.size();
            match kind {
                EntryKind::BulkData => summary.data_bytes += size,
                EntryKind::ExpansionData => summary.obb_bytes += size,
                EntryKind::Package => summary.package_bytes += size,
                EntryKind::Other => {},
            }
            summary.entries.push(EntrySummary { name, kind, size });
        }
        Ok(summary)
    }

    /// Bytes that would be written when restoring only the selected kinds.
    #[must_use]
    pub fn selected_bytes(&self, packages: bool, data: bool, obb: bool) -> u64 {
        (if packages { self.package_bytes } else { 0 })
            + (if data { self.data_bytes } else { 0 })
            + (if obb { self.obb_bytes } else { 0 })
    }

    pub fn entries_of(&self, kind: EntryKind) -> impl Iterator<Item = &EntrySummary> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }
}
