//! Recursive discovery of importable archives.

mod sort;

pub use self::sort::sort_candidates;

use crate::candidate::ImportCandidate;
use crate::context::Context;
use crate::error::{ErrorKind, describe};
use apkport_config::SortOrder;
use apkport_storage::StorageLocation;
use async_stream::stream;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;

/// Directory nesting beyond which the scanner stops descending. Guards
/// against symlink loops on direct paths.
const MAX_SCAN_DEPTH: usize = 64;

/// Progress events emitted by [`scan`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once.
/// 2. [`Discovered`](Self::Discovered) and [`Failed`](Self::Failed): zero or
///    more times, in scan order.
/// 3. [`Complete`](Self::Complete): exactly once, with the sorted list.
///
/// A cancelled scan ends without [`Complete`](Self::Complete).
#[derive(Debug)]
pub enum ScanEvent {
    Started { roots: usize },
    /// A matching file was accepted as a candidate.
    Discovered(ImportCandidate),
    /// Part of a root could not be read; scanning carried on without it.
    Failed { path: String, error: String },
    Complete(Vec<ImportCandidate>),
}

/// Streams [`ScanEvent`]s while walking every root of the context's scan
/// scope on a blocking worker.
pub fn scan(ctx: Arc<Context>, cancel: CancellationToken) -> impl Stream<Item = ScanEvent> + Send + 'static {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        let (sender, mut receiver) = unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || scan_blocking(&ctx, &cancel, &sender));
        while let Some(event) = receiver.recv().await {
            yield event;
        }
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "scan worker stopped unexpectedly");
        }
    })
}

/// Walk every root and send events for what is found. Returns the sorted
/// candidate list, or `None` if cancelled.
pub fn scan_blocking(
    ctx: &Context,
    cancel: &CancellationToken,
    events: &UnboundedSender<ScanEvent>,
) -> Option<Vec<ImportCandidate>> {
    let roots = match ctx.scan_roots() {
        Ok(roots) => roots,
        Err(e) => {
            tracing::warn!(error = %describe(&e), "could not resolve scan roots");
            let _ = events.send(ScanEvent::Failed { path: "<destination>".to_string(), error: describe(&e) });
            Vec::new()
        },
    };
    let _ = events.send(ScanEvent::Started { roots: roots.len() });
    let mut walker = Walker { ctx, cancel, events, found: Vec::new() };
    for root in &roots {
        tracing::info!(root = %root, "scanning");
        if !walker.walk(root, 0) {
            tracing::info!("scan cancelled");
            return None;
        }
    }
    let mut found = walker.found;
    sort_candidates(&mut found, ctx.sort);
    if ctx.sort != SortOrder::ScanOrder {
        tracing::debug!(order = ?ctx.sort, "sorted candidates");
    }
    tracing::info!(count = found.len(), "scan complete");
    let _ = events.send(ScanEvent::Complete(found.clone()));
    Some(found)
}

struct Walker<'a> {
    ctx: &'a Context,
    cancel: &'a CancellationToken,
    events: &'a UnboundedSender<ScanEvent>,
    found: Vec<ImportCandidate>,
}
impl Walker<'_> {
    /// Depth-first walk of `dir`. Returns `false` once cancelled.
    fn walk(&mut self, dir: &StorageLocation, depth: usize) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if depth > MAX_SCAN_DEPTH {
            tracing::warn!(path = %dir, "directory nesting too deep, skipping");
            return true;
        }
        let children = match dir.list() {
            Ok(children) => children,
            Err(e) => {
                let error = describe(&ErrorKind::storage(e));
                tracing::warn!(path = %dir, %error, "could not list directory");
                let _ = self.events.send(ScanEvent::Failed { path: dir.to_string(), error });
                return true;
            },
        };
        for child in children {
            let stat = match child.metadata() {
                Ok(stat) => stat,
                Err(e) => {
                    let error = describe(&ErrorKind::storage(e));
                    tracing::debug!(path = %child, %error, "could not stat entry");
                    continue;
                },
            };
            if stat.is_dir {
                if !self.walk(&child, depth + 1) {
                    return false;
                }
            } else if self.ctx.accepts(&stat.name) {
                let candidate = ImportCandidate::new(child, stat);
                tracing::debug!(path = %candidate.source, "found candidate");
                let _ = self.events.send(ScanEvent::Discovered(candidate.clone()));
                self.found.push(candidate);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Destination;
    use apkport_config::ScanScope;
    use apkport_storage::TreeHandle;
    use apkport_storage::tree::MemoryTree;
    use futures::StreamExt;
    use std::fs;
    use std::path::Path;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, relative.as_bytes()).unwrap();
    }

    fn context(root: &Path) -> Context {
        Context::new(StorageLocation::direct(root), Destination::Direct(root.join("out")))
            .unwrap()
            .with_custom_extension(Some("bak"))
    }

    #[tokio::test]
    async fn test_scan_filters_by_extension() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        for file in ["one.apk", "Two.ZIP", "nested/deep/three.xapk", "nested/four.bak", "notes.txt", "nested/img.png"] {
            touch(root, file);
        }
        let ctx = Arc::new(context(root));
        let events: Vec<_> = scan(ctx, CancellationToken::new()).collect().await;

        assert!(matches!(events.first(), Some(ScanEvent::Started { roots: 1 })));
        let discovered = events.iter().filter(|e| matches!(e, ScanEvent::Discovered(_))).count();
        assert_eq!(discovered, 4);
        let Some(ScanEvent::Complete(found)) = events.last() else {
            panic!("scan did not complete");
        };
        // Depth-first, children in (byte-wise) name order.
        let names: Vec<_> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Two.ZIP", "three.xapk", "four.bak", "one.apk"]);
        assert!(found.iter().all(|c| c.include.apk && c.include.data && c.include.obb));
    }

    #[test]
    fn test_scan_sorts() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "b.apk");
        touch(temp_dir.path(), "a/zz.apk");
        let mut ctx = context(temp_dir.path());
        ctx.sort = SortOrder::NameAscending;
        let (sender, _receiver) = unbounded_channel();
        let found = scan_blocking(&ctx, &CancellationToken::new(), &sender).unwrap();
        let names: Vec<_> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b.apk", "zz.apk"]);
    }

    #[test]
    fn test_scan_includes_tree_and_survives_failures() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "main.apk");
        let tree: TreeHandle = Arc::new(MemoryTree::with_files([("Backups/tree.zip", b"x")]));
        let mut ctx = context(temp_dir.path());
        ctx.tree = Some(tree);
        ctx.scope = ScanScope::All;
        // The first root fails entirely; the second is still scanned.
        ctx.storage_root = StorageLocation::direct(temp_dir.path().join("missing"));
        let (sender, mut receiver) = unbounded_channel();
        let found = scan_blocking(&ctx, &CancellationToken::new(), &sender).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "tree.zip");
        let mut failures = 0;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, ScanEvent::Failed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_ignores_links_back_to_ancestors() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "a/x.apk");
        let dir = temp_dir.path().join("a");
        std::os::unix::fs::symlink(&dir, dir.join("l1")).unwrap();
        std::os::unix::fs::symlink(&dir, dir.join("l2")).unwrap();
        let ctx = context(temp_dir.path());
        let (sender, _receiver) = unbounded_channel();
        let found = scan_blocking(&ctx, &CancellationToken::new(), &sender).unwrap();
        let sources: Vec<_> = found.iter().map(|c| c.source.clone()).collect();
        assert_eq!(sources, vec![StorageLocation::direct(dir.join("x.apk"))]);
    }

    #[test]
    fn test_cancelled_scan_has_no_result() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "main.apk");
        let ctx = context(temp_dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (sender, mut receiver) = unbounded_channel();
        assert!(scan_blocking(&ctx, &cancel, &sender).is_none());
        while let Ok(event) = receiver.try_recv() {
            assert!(!matches!(event, ScanEvent::Complete(_)));
        }
    }
}
