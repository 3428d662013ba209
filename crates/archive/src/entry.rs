//! Entry-path conventions.
//!
//! Bundles store auxiliary application files at the same relative paths they
//! occupy on device storage, so an entry's path alone decides where it goes:
//!
//! | Entry path (case-insensitive)   | Kind                          |
//! |---------------------------------|-------------------------------|
//! | `android/data/...`              | [`EntryKind::BulkData`]       |
//! | `android/obb/...`               | [`EntryKind::ExpansionData`]  |
//! | `<name>.apk` at the top level   | [`EntryKind::Package`]        |
//! | anything else                   | [`EntryKind::Other`]          |
//!
//! Some writers store `*` instead of `/` as the separator; names are
//! normalized before classification.

use crate::{BULK_DATA_PREFIX, EXPANSION_DATA_PREFIX, PACKAGE_EXTENSION};

/// Where an archive entry belongs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Per-application data, restored beneath main storage.
    BulkData,
    /// Per-application expansion files, restored beneath main storage.
    ExpansionData,
    /// An installable package, restored to the output destination.
    Package,
    /// Not something we know how to restore.
    Other,
}
impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BulkData => "data",
            Self::ExpansionData => "obb",
            Self::Package => "package",
            Self::Other => "other",
        }
    }
}

/// Replace `*` separators with `/` and drop any leading separators.
#[must_use]
pub fn normalize_entry_name(name: &str) -> String {
    name.replace('*', "/").trim_start_matches('/').to_string()
}

/// Classify an entry by its (normalized) name.
///
/// Prefix matches are component-based, so `Android/database` is not bulk data.
#[must_use]
pub fn classify(name: &str) -> EntryKind {
    let lower = normalize_entry_name(name).to_lowercase();
    if has_prefix(&lower, BULK_DATA_PREFIX) {
        return EntryKind::BulkData;
    }
    if has_prefix(&lower, EXPANSION_DATA_PREFIX) {
        return EntryKind::ExpansionData;
    }
    if !lower.contains('/') && is_package_name(&lower) {
        return EntryKind::Package;
    }
    EntryKind::Other
}

/// Whether a file name has the installable package extension.
#[must_use]
pub fn is_package_name(name: &str) -> bool {
    name.to_lowercase()
        .strip_suffix(PACKAGE_EXTENSION)
        .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
}

fn has_prefix(lower: &str, prefix: &str) -> bool {
    lower.strip_prefix(prefix).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Split a file name into stem and extension (the extension keeps its dot).
///
/// ```
/// use apkport_archive::split_extension;
/// assert_eq!(split_extension("app.apk"), ("app", ".apk"));
/// assert_eq!(split_extension("archive"), ("archive", ""));
/// assert_eq!(split_extension(".hidden"), (".hidden", ""));
/// ```
#[must_use]
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Android/data/com.example/files/save.dat", EntryKind::BulkData)]
    #[case("android/DATA/com.example/cache", EntryKind::BulkData)]
    #[case("Android*data*com.example*files*save.dat", EntryKind::BulkData)]
    #[case("Android/obb/com.example/main.1.com.example.obb", EntryKind::ExpansionData)]
    #[case("ANDROID/OBB/com.example/patch.obb", EntryKind::ExpansionData)]
    #[case("base.apk", EntryKind::Package)]
    #[case("Split_Config.ARM64_V8A.APK", EntryKind::Package)]
    #[case("/base.apk", EntryKind::Package)]
    #[case("nested/base.apk", EntryKind::Other)]
    #[case("Android/database/x", EntryKind::Other)]
    #[case("manifest.json", EntryKind::Other)]
    #[case("icon.png", EntryKind::Other)]
    #[case(".apk", EntryKind::Other)]
    fn test_classify(#[case] name: &str, #[case] expected: EntryKind) {
        assert_eq!(classify(name), expected);
    }

    #[rstest]
    #[case("a*b*c", "a/b/c")]
    #[case("/base.apk", "base.apk")]
    #[case("plain", "plain")]
    fn test_normalize(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(normalize_entry_name(name), expected);
    }

    #[rstest]
    #[case("app1.apk", ("app1", ".apk"))]
    #[case("bundle.tar.zip", ("bundle.tar", ".zip"))]
    #[case("noext", ("noext", ""))]
    fn test_split_extension(#[case] name: &str, #[case] expected: (&str, &str)) {
        assert_eq!(split_extension(name), expected);
    }
}
