//! Engine Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors from the storage and archive
//! crates are kept as children in the error tree.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("issue with file name generation from template")]
    Template,
    /// A storage operation failed.
    #[display("{_0}")]
    Storage(#[error(not(source))] String),
    /// An archive could not be read or written.
    #[display("archive error: {_0}")]
    Archive(#[error(not(source))] String),
    /// Underlying I/O error while streaming bytes.
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The destination could not be resolved; nothing was transferred.
    #[display("cannot prepare destination: {_0}")]
    Setup(#[error(not(source))] String),
    /// Another transfer run is already active.
    #[display("a transfer is already running")]
    Busy,
    /// Existing files would be overwritten and the caller has not confirmed.
    #[display("{_0} existing file(s) would be affected; confirmation required")]
    ConfirmationRequired(#[error(not(source))] usize),
    /// A peer transfer request exceeds the size the peer accepts.
    #[display("request is {size} bytes, limit is {limit}")]
    RequestTooLarge { size: usize, limit: usize },
    /// A background worker stopped unexpectedly.
    #[display("background worker failed")]
    Worker,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Storage(_) | Self::Busy)
    }

    /// Wrap a storage error, keeping the storage crate's frame as a child in
    /// the error tree.
    #[track_caller]
    pub fn storage(err: apkport_storage::error::Error) -> Error {
        let message = (*err).to_string();
        err.raise(ErrorKind::Storage(message))
    }

    /// Wrap an archive-crate error the same way.
    #[track_caller]
    pub fn archive(err: apkport_archive::error::Error) -> Error {
        let message = (*err).to_string();
        err.raise(ErrorKind::Archive(message))
    }

    /// Wrap a zip error, keeping its message.
    #[track_caller]
    pub fn zip(err: zip::result::ZipError) -> Error {
        exn::Exn::from(ErrorKind::Archive(err.to_string()))
    }
}

/// Human-readable one-line description of an error, for error logs.
pub fn describe(err: &Error) -> String {
    let kind: &ErrorKind = err;
    kind.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_keeps_message() {
        let inner: apkport_storage::error::Error =
            exn::Exn::from(apkport_storage::error::ErrorKind::NotFound("a/b.apk".into()));
        let err = ErrorKind::storage(inner);
        assert_eq!(describe(&err), "not found: a/b.apk");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::Busy.to_string(), "a transfer is already running");
        assert_eq!(
            ErrorKind::RequestTooLarge { size: 70_000, limit: 65_530 }.to_string(),
            "request is 70000 bytes, limit is 65530"
        );
        assert!(!ErrorKind::Template.is_retryable());
    }
}
