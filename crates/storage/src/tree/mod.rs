//! Permission-scoped document trees.
//!
//! A document tree is storage that can only be addressed through a granted
//! root and identifiers relative to it. There is no way to reach a node
//! without walking (or creating) every segment from the root, and nodes are
//! created explicitly with a name and a MIME hint rather than implied by a
//! write.
//!
//! Identifiers handed to a [`DocumentTree`] are relative paths, with the empty
//! path naming the root. Implementations must reject identifiers that escape
//! the root; [`validate_path`](crate::validate_path) does this for them.

#[cfg(any(test, feature = "mock"))]
mod memory;
mod mounted;

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryTree;
pub use self::mounted::MountedTree;

use crate::error::Result;
use crate::models::Stat;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A readable, seekable byte stream. Archive readers need both.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// A writable, seekable byte stream. Archive writers need both.
pub trait WriteSeek: Write + Seek + Send {}
impl<T: Write + Seek + Send> WriteSeek for T {}

/// Shared handle to a document tree.
pub type TreeHandle = Arc<dyn DocumentTree>;

/// Operations a permission-scoped tree must support.
///
/// All methods are blocking; callers run them on a worker thread.
pub trait DocumentTree: Send + Sync {
    /// A human-readable label for the granted root, used in display paths.
    fn label(&self) -> &str;

    /// Metadata for the node `id`. Fails with
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if it does not exist.
    fn stat(&self, id: &Path) -> Result<Stat>;

    /// Identifiers of the direct children of directory `id`, in no particular
    /// order.
    fn children(&self, id: &Path) -> Result<Vec<PathBuf>>;

    /// Create a directory `name` under `parent`, returning its identifier.
    /// Fails if the name is already taken.
    fn create_directory(&self, parent: &Path, name: &str) -> Result<PathBuf>;

    /// Create an empty document `name` under `parent`, returning its
    /// identifier. Fails if the name is already taken.
    fn create_document(&self, parent: &Path, name: &str, mime: &str) -> Result<PathBuf>;

    /// Open an existing document for reading.
    fn open_read(&self, id: &Path) -> Result<Box<dyn ReadSeek>>;

    /// Open an existing document for writing, truncating its contents.
    fn open_write(&self, id: &Path) -> Result<Box<dyn WriteSeek>>;

    /// Delete a document, or a directory and everything beneath it.
    fn delete(&self, id: &Path) -> Result<()>;
}
