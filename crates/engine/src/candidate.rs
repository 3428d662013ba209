//! Items queued for a transfer run.

use apkport_archive::{BULK_DATA_DIR, EXPANSION_DATA_DIR, is_package_name};
use apkport_storage::{Stat, StorageLocation};
use std::path::PathBuf;
use time::OffsetDateTime;

/// What kinds of content an import restores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Inclusion {
    pub apk: bool,
    pub data: bool,
    pub obb: bool,
}
impl Default for Inclusion {
    fn default() -> Self {
        Self { apk: true, data: true, obb: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateKind {
    /// A bare installable package, copied as-is.
    Package,
    /// An archive bundling packages with data and expansion files.
    Bundle,
}

/// An archive found by the scanner, waiting to be imported.
#[derive(Clone, Debug)]
pub struct ImportCandidate {
    pub source: StorageLocation,
    pub name: String,
    pub size: u64,
    pub modified: OffsetDateTime,
    pub kind: CandidateKind,
    pub include: Inclusion,
}
impl ImportCandidate {
    /// Build a candidate for a scanned file. Every inclusion flag starts out
    /// enabled.
    pub fn new(source: StorageLocation, stat: Stat) -> Self {
        let kind = match is_package_name(&stat.name) {
            true => CandidateKind::Package,
            false => CandidateKind::Bundle,
        };
        Self { source, name: stat.name, size: stat.size, modified: stat.modified, kind, include: Inclusion::default() }
    }

    pub fn with_inclusion(mut self, include: Inclusion) -> Self {
        self.include = include;
        self
    }
}

/// An installed application, as far as exporting needs to know it.
///
/// Reading this information out of a package is somebody else's job.
#[derive(Clone, Debug)]
pub struct AppRef {
    /// Display label
    pub name: String,
    pub package: String,
    pub version_name: String,
    pub version_code: i64,
    /// The base package file.
    pub package_file: StorageLocation,
    /// Split package files, if the application was installed as a split set.
    pub splits: Vec<StorageLocation>,
}
impl AppRef {
    /// Data directory relative to main storage.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(BULK_DATA_DIR).join(&self.package)
    }

    /// Expansion file directory relative to main storage.
    pub fn obb_dir(&self) -> PathBuf {
        PathBuf::from(EXPANSION_DATA_DIR).join(&self.package)
    }
}

/// An application waiting to be exported.
#[derive(Clone, Debug)]
pub struct ExportCandidate {
    pub app: AppRef,
    pub include_data: bool,
    pub include_obb: bool,
}
impl ExportCandidate {
    pub fn new(app: AppRef) -> Self {
        Self { app, include_data: false, include_obb: false }
    }

    pub fn with_data(mut self, include: bool) -> Self {
        self.include_data = include;
        self
    }

    pub fn with_obb(mut self, include: bool) -> Self {
        self.include_obb = include;
        self
    }

    /// Whether the export produces a bundle rather than a bare package.
    pub fn is_bundle(&self) -> bool {
        self.include_data || self.include_obb || !self.app.splits.is_empty()
    }

    pub fn is_split(&self) -> bool {
        !self.app.splits.is_empty()
    }
}
