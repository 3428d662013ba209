//! Document tree backed by a host directory.
//!
//! This is how a tree grant looks when the granted root is reachable as an
//! ordinary directory (a mounted device, an emulator's shared folder). Nodes
//! are still only addressed by tree-relative identifiers, and creation is
//! explicit, so code written against it behaves the same as against any other
//! [`DocumentTree`].

use crate::error::{ErrorKind, Result};
use crate::models::Stat;
use crate::path::{validate_id, validate_name};
use crate::tree::{DocumentTree, ReadSeek, WriteSeek};
use exn::ResultExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Document tree rooted at an absolute host directory.
///
/// # Examples
///
/// ```no_run
/// use apkport_storage::tree::MountedTree;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let tree = MountedTree::new("SD card", "/mnt/sdcard")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MountedTree {
    label: String,
    root: PathBuf,
}
impl MountedTree {
    /// Create a new mounted tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not absolute, or exists and is not a
    /// directory. A missing root is created.
    pub fn new(label: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::NotADirectory(root));
            }
        } else {
            fs::create_dir_all(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }
        Ok(Self { label: label.into(), root })
    }

    /// Get the absolute path for a tree-relative identifier.
    fn absolute_path(&self, id: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_id(id)?))
    }

    /// Convert an absolute path back to a tree-relative identifier.
    fn relative_path(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        validate_id(relative)
    }

    fn create_child(&self, parent: &Path, name: &str, create: impl FnOnce(&Path) -> std::io::Result<()>) -> Result<PathBuf> {
        let name = validate_name(name)?;
        let parent_abs = self.absolute_path(parent)?;
        if !parent_abs.is_dir() {
            exn::bail!(ErrorKind::NotADirectory(parent.to_path_buf()));
        }
        let id = validate_id(parent)?.join(name);
        create(&parent_abs.join(name)).map_err(|e| ErrorKind::from_io(e, &id))?;
        tracing::debug!(tree = %self.label, id = %id.display(), "created node");
        Ok(id)
    }
}

impl DocumentTree for MountedTree {
    fn label(&self) -> &str {
        &self.label
    }

    fn stat(&self, id: &Path) -> Result<Stat> {
        let abs = self.absolute_path(id)?;
        let metadata = fs::metadata(&abs).map_err(|e| ErrorKind::from_io(e, id))?;
        let name = match id.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.label.clone(),
        };
        Stat::from_metadata(name, &metadata)
    }

    fn children(&self, id: &Path) -> Result<Vec<PathBuf>> {
        let abs = self.absolute_path(id)?;
        if !abs.is_dir() {
            exn::bail!(ErrorKind::NotADirectory(id.to_path_buf()));
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(&abs).map_err(|e| ErrorKind::from_io(e, id))? {
            let entry = entry.map_err(|e| ErrorKind::from_io(e, id))?;
            let file_type = entry.file_type().map_err(|e| ErrorKind::from_io(e, id))?;
            if !file_type.is_file() && !file_type.is_dir() {
                continue;
            }
            children.push(self.relative_path(&entry.path())?);
        }
        Ok(children)
    }

    fn create_directory(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        self.create_child(parent, name, |path| fs::create_dir(path))
    }

    fn create_document(&self, parent: &Path, name: &str, _mime: &str) -> Result<PathBuf> {
        self.create_child(parent, name, |path| OpenOptions::new().write(true).create_new(true).open(path).map(drop))
    }

    fn open_read(&self, id: &Path) -> Result<Box<dyn ReadSeek>> {
        let abs = self.absolute_path(id)?;
        let file = File::open(&abs).map_err(|e| ErrorKind::from_io(e, id))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, id: &Path) -> Result<Box<dyn WriteSeek>> {
        let abs = self.absolute_path(id)?;
        let file = OpenOptions::new().write(true).truncate(true).open(&abs).map_err(|e| ErrorKind::from_io(e, id))?;
        Ok(Box::new(file))
    }

    fn delete(&self, id: &Path) -> Result<()> {
        let abs = self.absolute_path(id)?;
        if abs == self.root {
            exn::bail!(ErrorKind::PermissionDenied(id.to_path_buf()));
        }
        let metadata = fs::symlink_metadata(&abs).map_err(|e| ErrorKind::from_io(e, id))?;
        let result = match metadata.is_dir() {
            true => fs::remove_dir_all(&abs),
            false => fs::remove_file(&abs),
        };
        Ok(result.map_err(|e| ErrorKind::from_io(e, id))?)
    }
}
