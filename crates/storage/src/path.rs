//! Path validation utilities.
//!
//! Tree-relative identifiers and single names are checked here before they
//! ever reach a backend, so no backend has to worry about traversal.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a relative storage path and returns it normalized.
///
/// Ensures that paths don't escape the root (no `..` traversal). Null bytes
/// and platform prefixes are rejected, as are paths that normalize to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use apkport_storage::validate_path;
/// assert!(validate_path("Android/data/com.example/files").is_ok());
/// assert!(validate_path("a/../base.apk").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("wrong/.././Android//obb/").unwrap(),
///     Path::new("Android/obb")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Like [`validate`], but an empty path is accepted and means "the root".
pub(crate) fn validate_id(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() || path.components().all(|c| matches!(c, Component::CurDir)) {
        return Ok(PathBuf::new());
    }
    validate(path)
}

/// Validates a single file or directory name.
pub fn validate_name(name: &str) -> Result<&str> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        exn::bail!(ErrorKind::InvalidName(name.to_string()));
    }
    Ok(name)
}
