//! Archive conventions shared by the scanner and the transfer engine.
//!
//! This crate knows what a bundle looks like: which entry paths hold
//! application data, expansion files or installable packages
//! ([`classify`]), how big each part is ([`ArchiveSummary`]), and how
//! entries should be compressed when packing ([`CompressionLevel`]).

mod entry;
pub mod error;
mod level;
mod summary;

pub use crate::entry::{EntryKind, classify, is_package_name, normalize_entry_name, split_extension};
pub use crate::level::CompressionLevel;
pub use crate::summary::{ArchiveSummary, EntrySummary};

/// Lowercase entry-path prefix for per-application data.
pub const BULK_DATA_PREFIX: &str = "android/data";
/// Lowercase entry-path prefix for per-application expansion files.
pub const EXPANSION_DATA_PREFIX: &str = "android/obb";
/// Directory (relative to main storage) that holds per-application data.
pub const BULK_DATA_DIR: &str = "Android/data";
/// Directory (relative to main storage) that holds expansion files.
pub const EXPANSION_DATA_DIR: &str = "Android/obb";

/// Extension of an installable package, without the dot.
pub const PACKAGE_EXTENSION: &str = "apk";
/// Extension of a bundle holding a split package set.
pub const SPLIT_BUNDLE_EXTENSION: &str = "apks";
/// Extension used for bundles unless configured otherwise.
pub const DEFAULT_BUNDLE_EXTENSION: &str = "zip";
/// Extensions the scanner always accepts, in addition to a custom one.
pub const SCAN_EXTENSIONS: [&str; 3] = [PACKAGE_EXTENSION, "zip", "xapk"];

/// Entry name of the primary package inside a split bundle.
pub const BASE_PACKAGE_NAME: &str = "base.apk";
/// Comment written into every bundle.
pub const BUNDLE_COMMENT: &str = concat!("Packaged by apkport ", env!("CARGO_PKG_VERSION"));

pub const MIME_PACKAGE: &str = "application/vnd.android.package-archive";
pub const MIME_ZIP: &str = "application/zip";
pub const MIME_BINARY: &str = "application/octet-stream";
