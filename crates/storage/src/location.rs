//! Backend-agnostic handles to files and directories.
//!
//! A [`StorageLocation`] is either a direct filesystem path or a node inside a
//! [`DocumentTree`]. Handles are immutable: creating or deleting something
//! returns a new handle (or an error) and never changes the handle it was
//! called on. Existence is always re-queried, never cached.

use crate::error::{ErrorKind, Result};
use crate::models::{Stat, WalkEntry};
use crate::path::{validate_id, validate_name};
use crate::tree::{ReadSeek, TreeHandle, WriteSeek};
use exn::OptionExt;
use std::fmt::{self, Debug, Display, Formatter};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// A node inside a document tree.
#[derive(Clone)]
pub struct TreeNode {
    tree: TreeHandle,
    id: PathBuf,
}
impl TreeNode {
    pub fn tree(&self) -> &TreeHandle {
        &self.tree
    }

    /// Tree-relative identifier; empty for the granted root.
    pub fn id(&self) -> &Path {
        &self.id
    }
}

/// Handle to a file or directory on one of the two storage backends.
#[derive(Clone)]
pub enum StorageLocation {
    /// A conventional hierarchical filesystem path.
    Direct(PathBuf),
    /// A node in a permission-scoped document tree.
    Tree(TreeNode),
}

impl StorageLocation {
    pub fn direct(path: impl Into<PathBuf>) -> Self {
        Self::Direct(path.into())
    }

    /// The granted root of a document tree.
    pub fn tree_root(tree: TreeHandle) -> Self {
        Self::Tree(TreeNode { tree, id: PathBuf::new() })
    }

    /// Find-or-create `segments` beneath the root of `tree`.
    ///
    /// Each segment is looked up under the current node and created when
    /// absent. If any creation fails the whole lookup fails.
    pub fn open_tree<S: AsRef<str>>(tree: TreeHandle, segments: &[S]) -> Result<Self> {
        let mut current = Self::tree_root(tree);
        for segment in segments {
            current = current.find_or_create_dir(segment.as_ref())?;
        }
        Ok(current)
    }

    /// Path used for display and sorting. Tree nodes are shown beneath the
    /// tree's label.
    pub fn display_path(&self) -> PathBuf {
        match self {
            Self::Direct(path) => path.clone(),
            Self::Tree(node) if node.id.as_os_str().is_empty() => PathBuf::from(node.tree.label()),
            Self::Tree(node) => Path::new(node.tree.label()).join(&node.id),
        }
    }

    /// Last path segment, or the tree label for a tree root.
    pub fn name(&self) -> String {
        match self {
            Self::Direct(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            Self::Tree(node) => match node.id.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => node.tree.label().to_string(),
            },
        }
    }

    /// Whether something currently exists at this location.
    pub fn exists(&self) -> Result<bool> {
        match self {
            Self::Direct(path) => Ok(path.try_exists().map_err(|e| ErrorKind::from_io(e, path))?),
            Self::Tree(node) => match node.tree.stat(&node.id) {
                Ok(_) => Ok(true),
                Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            },
        }
    }

    pub fn metadata(&self) -> Result<Stat> {
        match self {
            Self::Direct(path) => {
                let metadata = fs::metadata(path).map_err(|e| ErrorKind::from_io(e, path))?;
                Stat::from_metadata(self.name(), &metadata)
            },
            Self::Tree(node) => node.tree.stat(&node.id),
        }
    }

    pub fn is_dir(&self) -> Result<bool> {
        Ok(self.metadata()?.is_dir)
    }

    /// Handle for a direct child called `name`. Nothing is checked on disk.
    pub fn child(&self, name: &str) -> Result<Self> {
        let name = validate_name(name)?;
        Ok(match self {
            Self::Direct(path) => Self::Direct(path.join(name)),
            Self::Tree(node) => Self::Tree(TreeNode { tree: Arc::clone(&node.tree), id: node.id.join(name) }),
        })
    }

    /// The child called `name`, if it currently exists.
    pub fn find(&self, name: &str) -> Result<Option<Self>> {
        let child = self.child(name)?;
        Ok(child.exists()?.then_some(child))
    }

    /// Children of this directory, ordered by name. Symbolic links and special
    /// files are left out.
    ///
    /// # Errors
    ///
    /// Fails with [`NotADirectory`](ErrorKind::NotADirectory) if this location
    /// is not a directory.
    pub fn list(&self) -> Result<Vec<Self>> {
        if !self.is_dir()? {
            exn::bail!(ErrorKind::NotADirectory(self.display_path()));
        }
        let mut children = match self {
            Self::Direct(path) => {
                let mut children = Vec::new();
                for entry in fs::read_dir(path).map_err(|e| ErrorKind::from_io(e, path))? {
                    let entry = entry.map_err(|e| ErrorKind::from_io(e, path))?;
                    let file_type = entry.file_type().map_err(|e| ErrorKind::from_io(e, path))?;
                    // Links are never followed, so a link back to an ancestor cannot loop a walk.
                    if !file_type.is_file() && !file_type.is_dir() {
                        tracing::trace!(path = %entry.path().display(), "skipping link or special file");
                        continue;
                    }
                    children.push(Self::Direct(entry.path()));
                }
                children
            },
            Self::Tree(node) => node
                .tree
                .children(&node.id)?
                .into_iter()
                .map(|id| Self::Tree(TreeNode { tree: Arc::clone(&node.tree), id }))
                .collect(),
        };
        children.sort_by_key(|child| child.name());
        Ok(children)
    }

    /// Create an empty file called `name` in this directory.
    ///
    /// Fails with [`AlreadyExists`](ErrorKind::AlreadyExists) if the name is
    /// taken. The MIME hint is only meaningful to document trees.
    pub fn create_file(&self, name: &str, mime: &str) -> Result<Self> {
        let name = validate_name(name)?;
        match self {
            Self::Direct(path) => {
                let target = path.join(name);
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)
                    .map_err(|e| ErrorKind::from_io(e, &target))?;
                Ok(Self::Direct(target))
            },
            Self::Tree(node) => {
                let id = node.tree.create_document(&node.id, name, mime)?;
                Ok(Self::Tree(TreeNode { tree: Arc::clone(&node.tree), id }))
            },
        }
    }

    /// Create a directory called `name` in this directory.
    pub fn create_dir(&self, name: &str) -> Result<Self> {
        let name = validate_name(name)?;
        match self {
            Self::Direct(path) => {
                let target = path.join(name);
                fs::create_dir(&target).map_err(|e| ErrorKind::from_io(e, &target))?;
                Ok(Self::Direct(target))
            },
            Self::Tree(node) => {
                let id = node.tree.create_directory(&node.id, name)?;
                Ok(Self::Tree(TreeNode { tree: Arc::clone(&node.tree), id }))
            },
        }
    }

    fn find_or_create_dir(&self, name: &str) -> Result<Self> {
        match self.find(name)? {
            Some(existing) if existing.is_dir()? => Ok(existing),
            Some(existing) => exn::bail!(ErrorKind::NotADirectory(existing.display_path())),
            None => self.create_dir(name),
        }
    }

    /// Find-or-create every directory along `relative`, starting here.
    #[instrument(skip(self, relative), fields(base = %self.display_path().display(), relative = %relative.as_ref().display()))]
    pub fn resolve_dir(&self, relative: impl AsRef<Path>) -> Result<Self> {
        let relative = validate_id(relative.as_ref())?;
        let mut current = self.clone();
        for component in relative.iter() {
            let name = component
                .to_str()
                .ok_or_raise(|| ErrorKind::InvalidName(component.to_string_lossy().into_owned()))?;
            current = current.find_or_create_dir(name)?;
        }
        Ok(current)
    }

    /// Follow `relative` from here without creating anything. `None` if any
    /// segment is missing.
    pub fn lookup(&self, relative: impl AsRef<Path>) -> Result<Option<Self>> {
        let relative = validate_id(relative.as_ref())?;
        let mut current = self.clone();
        for component in relative.iter() {
            let name = component
                .to_str()
                .ok_or_raise(|| ErrorKind::InvalidName(component.to_string_lossy().into_owned()))?;
            match current.find(name)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    pub fn open_read(&self) -> Result<Box<dyn ReadSeek>> {
        match self {
            Self::Direct(path) => Ok(Box::new(File::open(path).map_err(|e| ErrorKind::from_io(e, path))?)),
            Self::Tree(node) => node.tree.open_read(&node.id),
        }
    }

    /// Open an existing file for writing, truncating it.
    pub fn open_write(&self) -> Result<Box<dyn WriteSeek>> {
        match self {
            Self::Direct(path) => {
                let file = OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| ErrorKind::from_io(e, path))?;
                Ok(Box::new(file))
            },
            Self::Tree(node) => node.tree.open_write(&node.id),
        }
    }

    /// Create a new file called `name` and open it for writing.
    pub fn create_writer(&self, name: &str, mime: &str) -> Result<(Self, Box<dyn WriteSeek>)> {
        let file = self.create_file(name, mime)?;
        let writer = file.open_write()?;
        Ok((file, writer))
    }

    /// Open `name` for writing, replacing the existing file or creating it.
    pub fn overwrite(&self, name: &str, mime: &str) -> Result<(Self, Box<dyn WriteSeek>)> {
        match self.find(name)? {
            Some(existing) if existing.is_dir()? => exn::bail!(ErrorKind::AlreadyExists(existing.display_path())),
            Some(existing) => {
                let writer = existing.open_write()?;
                Ok((existing, writer))
            },
            None => self.create_writer(name, mime),
        }
    }

    /// Delete this file, or this directory and everything beneath it.
    pub fn delete(&self) -> Result<()> {
        match self {
            Self::Direct(path) => {
                let metadata = fs::symlink_metadata(path).map_err(|e| ErrorKind::from_io(e, path))?;
                let result = match metadata.is_dir() {
                    true => fs::remove_dir_all(path),
                    false => fs::remove_file(path),
                };
                Ok(result.map_err(|e| ErrorKind::from_io(e, path))?)
            },
            Self::Tree(node) => node.tree.delete(&node.id),
        }
    }

    /// Best-effort deletion for cleanup paths. Failures are logged, never
    /// raised.
    pub fn discard(&self) {
        if let Err(e) = self.delete() {
            let kind: &ErrorKind = &e;
            tracing::warn!(path = %self.display_path().display(), error = %kind, "failed to clean up");
        }
    }

    /// Every node beneath this directory, depth-first, directories included.
    ///
    /// A file yields itself with an empty relative path.
    pub fn walk(&self) -> Result<Vec<WalkEntry>> {
        let stat = self.metadata()?;
        if !stat.is_dir {
            return Ok(vec![WalkEntry { relative: PathBuf::new(), location: self.clone(), stat }]);
        }
        let mut entries = Vec::new();
        let mut stack = vec![(PathBuf::new(), self.clone())];
        while let Some((relative, directory)) = stack.pop() {
            for child in directory.list()? {
                let stat = child.metadata()?;
                let child_relative = relative.join(&stat.name);
                if stat.is_dir {
                    stack.push((child_relative.clone(), child.clone()));
                }
                entries.push(WalkEntry { relative: child_relative, location: child, stat });
            }
        }
        Ok(entries)
    }

    /// Sum of the sizes of every file at or beneath this location. A location
    /// that does not exist has a size of zero.
    pub fn total_size(&self) -> Result<u64> {
        if !self.exists()? {
            return Ok(0);
        }
        Ok(self.walk()?.iter().filter(|entry| !entry.stat.is_dir).map(|entry| entry.stat.size).sum())
    }
}

impl Display for StorageLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_path().display())
    }
}
impl Debug for StorageLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(path) => f.debug_tuple("Direct").field(path).finish(),
            Self::Tree(node) => f.debug_struct("Tree").field("tree", &node.tree.label()).field("id", &node.id).finish(),
        }
    }
}
impl PartialEq for StorageLocation {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Direct(a), Self::Direct(b)) => a == b,
            (Self::Tree(a), Self::Tree(b)) => Arc::ptr_eq(&a.tree, &b.tree) && a.id == b.id,
            _ => false,
        }
    }
}
