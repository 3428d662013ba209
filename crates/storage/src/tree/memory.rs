//! In-memory document tree for testing.

use crate::error::{ErrorKind, Result};
use crate::models::Stat;
use crate::path::{validate, validate_id, validate_name};
use crate::tree::{DocumentTree, ReadSeek, WriteSeek};
use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;

#[derive(Clone, Debug)]
enum Node {
    Directory { modified: OffsetDateTime },
    Document { data: Vec<u8>, mime: String, modified: OffsetDateTime },
}

type Nodes = Arc<RwLock<HashMap<PathBuf, Node>>>;

/// In-memory document tree for testing.
///
/// Nodes live in a `HashMap` behind a [`RwLock`], so every trait method works
/// on `&self`. The tree can be switched to read-only to simulate a grant that
/// has been revoked, which makes every creation, write and deletion fail.
pub struct MemoryTree {
    label: String,
    nodes: Nodes,
    read_only: AtomicBool,
}

impl MemoryTree {
    /// Create a tree pre-populated with documents. Intermediate directories
    /// are created implicitly.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then test
    /// should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut map = HashMap::new();
        map.insert(PathBuf::new(), Node::Directory { modified: now });
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate(&path) else {
                panic!("MemoryTree::with_files: invalid path {}", path.display());
            };
            for ancestor in validated.ancestors().skip(1) {
                map.entry(ancestor.to_path_buf()).or_insert(Node::Directory { modified: now });
            }
            let data = data.into();
            map.insert(validated, Node::Document { data, mime: String::new(), modified: now });
        }
        Self {
            label: "memory".to_string(),
            nodes: Arc::new(RwLock::new(map)),
            read_only: AtomicBool::new(false),
        }
    }

    /// Change the label of the tree.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Toggle read-only mode.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Contents of a document, or `None` if there is no document at `path`.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let nodes = self.nodes.read().ok()?;
        match nodes.get(path.as_ref()) {
            Some(Node::Document { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// MIME hint a document was created with.
    pub fn mime(&self, path: impl AsRef<Path>) -> Option<String> {
        let nodes = self.nodes.read().ok()?;
        match nodes.get(path.as_ref()) {
            Some(Node::Document { mime, .. }) => Some(mime.clone()),
            _ => None,
        }
    }

    /// Identifiers of every document in the tree, sorted.
    pub fn documents(&self) -> Vec<PathBuf> {
        let Ok(nodes) = self.nodes.read() else {
            return Vec::new();
        };
        let mut documents: Vec<_> =
            nodes.iter().filter(|(_, node)| matches!(node, Node::Document { .. })).map(|(id, _)| id.clone()).collect();
        documents.sort();
        documents
    }

    fn check_writable(&self, id: &Path) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::PermissionDenied(id.to_path_buf()));
        }
        Ok(())
    }

    fn poisoned() -> ErrorKind {
        ErrorKind::BackendError("memory tree lock poisoned".to_string())
    }

    fn insert(&self, parent: &Path, name: &str, node: Node) -> Result<PathBuf> {
        let name = validate_name(name)?;
        let parent = validate_id(parent)?;
        let id = parent.join(name);
        self.check_writable(&id)?;
        let mut nodes = self.nodes.write().map_err(|_| Self::poisoned())?;
        match nodes.get(&parent) {
            Some(Node::Directory { .. }) => {},
            Some(Node::Document { .. }) => exn::bail!(ErrorKind::NotADirectory(parent)),
            None => exn::bail!(ErrorKind::NotFound(parent)),
        }
        if nodes.contains_key(&id) {
            exn::bail!(ErrorKind::AlreadyExists(id));
        }
        nodes.insert(id.clone(), node);
        Ok(id)
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

impl DocumentTree for MemoryTree {
    fn label(&self) -> &str {
        &self.label
    }

    fn stat(&self, id: &Path) -> Result<Stat> {
        let id = validate_id(id)?;
        let nodes = self.nodes.read().map_err(|_| Self::poisoned())?;
        let name = match id.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.label.clone(),
        };
        match nodes.get(&id) {
            Some(Node::Directory { modified }) => Ok(Stat::directory(name, *modified)),
            Some(Node::Document { data, modified, .. }) => Ok(Stat::file(name, data.len() as u64, *modified)),
            None => exn::bail!(ErrorKind::NotFound(id)),
        }
    }

    fn children(&self, id: &Path) -> Result<Vec<PathBuf>> {
        let id = validate_id(id)?;
        let nodes = self.nodes.read().map_err(|_| Self::poisoned())?;
        match nodes.get(&id) {
            Some(Node::Directory { .. }) => {},
            Some(Node::Document { .. }) => exn::bail!(ErrorKind::NotADirectory(id)),
            None => exn::bail!(ErrorKind::NotFound(id)),
        }
        Ok(nodes
            .keys()
            .filter(|key| !key.as_os_str().is_empty() && key.parent() == Some(id.as_path()))
            .cloned()
            .collect())
    }

    fn create_directory(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        self.insert(parent, name, Node::Directory { modified: OffsetDateTime::now_utc() })
    }

    fn create_document(&self, parent: &Path, name: &str, mime: &str) -> Result<PathBuf> {
        let node = Node::Document { data: Vec::new(), mime: mime.to_string(), modified: OffsetDateTime::now_utc() };
        self.insert(parent, name, node)
    }

    fn open_read(&self, id: &Path) -> Result<Box<dyn ReadSeek>> {
        let id = validate_id(id)?;
        let nodes = self.nodes.read().map_err(|_| Self::poisoned())?;
        match nodes.get(&id) {
            Some(Node::Document { data, .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(Node::Directory { .. }) => exn::bail!(ErrorKind::NotADirectory(id)),
            None => exn::bail!(ErrorKind::NotFound(id)),
        }
    }

    fn open_write(&self, id: &Path) -> Result<Box<dyn WriteSeek>> {
        let id = validate_id(id)?;
        self.check_writable(&id)?;
        let mut nodes = self.nodes.write().map_err(|_| Self::poisoned())?;
        match nodes.get_mut(&id) {
            Some(Node::Document { data, modified, .. }) => {
                data.clear();
                *modified = OffsetDateTime::now_utc();
            },
            Some(Node::Directory { .. }) => exn::bail!(ErrorKind::NotADirectory(id)),
            None => exn::bail!(ErrorKind::NotFound(id)),
        }
        Ok(Box::new(MemoryWriter { nodes: Arc::clone(&self.nodes), id, buffer: Cursor::new(Vec::new()), dirty: false }))
    }

    fn delete(&self, id: &Path) -> Result<()> {
        let id = validate_id(id)?;
        if id.as_os_str().is_empty() {
            exn::bail!(ErrorKind::PermissionDenied(id));
        }
        self.check_writable(&id)?;
        let mut nodes = self.nodes.write().map_err(|_| Self::poisoned())?;
        if nodes.remove(&id).is_none() {
            exn::bail!(ErrorKind::NotFound(id));
        }
        nodes.retain(|key, _| !key.starts_with(&id));
        Ok(())
    }
}

/// Buffers writes and commits them to the tree on flush and on drop. A
/// document deleted while the writer is open stays deleted.
struct MemoryWriter {
    nodes: Nodes,
    id: PathBuf,
    buffer: Cursor<Vec<u8>>,
    dirty: bool,
}
impl MemoryWriter {
    fn commit(&mut self) -> std::io::Result<()> {
        let mut nodes = self.nodes.write().map_err(|_| std::io::Error::other("memory tree lock poisoned"))?;
        if let Some(Node::Document { data, modified, .. }) = nodes.get_mut(&self.id) {
            data.clone_from(self.buffer.get_ref());
            *modified = OffsetDateTime::now_utc();
        }
        self.dirty = false;
        Ok(())
    }
}
impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.dirty = true;
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.commit()
    }
}
impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.buffer.seek(pos)
    }
}
impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if self.dirty {
            let _ = self.commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_with_files_creates_ancestors() {
        let tree = MemoryTree::with_files([("a/b/c.bin", b"x")]);
        assert!(tree.stat(Path::new("a")).unwrap().is_dir);
        assert!(tree.stat(Path::new("a/b")).unwrap().is_dir);
        assert_eq!(tree.stat(Path::new("a/b/c.bin")).unwrap().size, 1);
        assert_eq!(tree.children(Path::new("")).unwrap(), vec![PathBuf::from("a")]);
    }

    #[test]
    fn test_writer_commits_on_drop() {
        let tree = MemoryTree::default();
        let id = tree.create_document(Path::new(""), "doc", "text/plain").unwrap();
        {
            let mut writer = tree.open_write(&id).unwrap();
            writer.write_all(b"hello").unwrap();
        }
        assert_eq!(tree.contents("doc").unwrap(), b"hello");
        assert_eq!(tree.mime("doc").unwrap(), "text/plain");
        let mut buf = Vec::new();
        tree.open_read(&id).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn test_deleted_document_is_not_resurrected() {
        let tree = MemoryTree::default();
        let id = tree.create_document(Path::new(""), "doc", "").unwrap();
        let mut writer = tree.open_write(&id).unwrap();
        writer.write_all(b"partial").unwrap();
        tree.delete(&id).unwrap();
        drop(writer);
        assert!(tree.contents("doc").is_none());
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let tree = MemoryTree::with_files([("doc", b"x")]);
        tree.set_read_only(true);
        let err = tree.create_directory(Path::new(""), "dir").unwrap_err();
        assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
        assert!(tree.open_write(Path::new("doc")).is_err());
        assert!(tree.delete(Path::new("doc")).is_err());
        // Reading still works.
        assert!(tree.open_read(Path::new("doc")).is_ok());
    }

    #[test]
    fn test_delete_directory_removes_descendants() {
        let tree = MemoryTree::with_files([("d/one", b"1"), ("d/sub/two", b"2"), ("keep", b"3")]);
        tree.delete(Path::new("d")).unwrap();
        assert_eq!(tree.documents(), vec![PathBuf::from("keep")]);
    }
}
