//! Sequencing of scan, precompute and transfer.
//!
//! The orchestrator owns the candidate list and the single transfer slot. A
//! typical import goes:
//!
//! 1. [`refresh`](Orchestrator::refresh) to scan and replace the list,
//! 2. [`prepare_import`](Orchestrator::prepare_import) to size the batch and
//!    find files it would replace,
//! 3. [`start_import`](Orchestrator::start_import), confirmed if the plan
//!    [needs confirmation](ImportPlan::needs_confirmation).
//!
//! Exports follow the same steps without the scan.

use crate::candidate::{ExportCandidate, ImportCandidate};
use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::precompute::{DuplicateReport, precompute_export, precompute_import};
use crate::scan::{ScanEvent, scan};
use crate::store::CandidateStore;
use crate::transfer::{RunHandle, RunState, export, import, launch};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Capacity of the notification channel; slow subscribers miss the oldest.
const NOTIFICATION_CAPACITY: usize = 16;

/// Broadcast to subscribers when a scan or transfer finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    ImportListChanged,
    StorageChanged,
}

/// A precomputed import batch.
#[derive(Clone, Debug)]
pub struct ImportPlan {
    pub candidates: Vec<ImportCandidate>,
    pub report: DuplicateReport,
}
impl ImportPlan {
    /// Whether starting this plan would replace existing files.
    pub fn needs_confirmation(&self) -> bool {
        self.report.has_duplicates()
    }
}

/// A precomputed export batch.
#[derive(Clone, Debug)]
pub struct ExportPlan {
    pub candidates: Vec<ExportCandidate>,
    pub report: DuplicateReport,
}
impl ExportPlan {
    /// Whether some outputs will be numbered because their name is taken.
    pub fn needs_confirmation(&self) -> bool {
        self.report.has_duplicates()
    }
}

pub struct Orchestrator {
    ctx: Arc<Context>,
    store: CandidateStore,
    slot: Arc<Semaphore>,
    notifications: broadcast::Sender<Notification>,
}

impl Orchestrator {
    pub fn new(ctx: Context) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { ctx: Arc::new(ctx), store: CandidateStore::default(), slot: Arc::new(Semaphore::new(1)), notifications }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn store(&self) -> &CandidateStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Whether a transfer run currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Scan, then replace the candidate list with the result. A cancelled
    /// scan leaves the list untouched.
    pub fn refresh(&self, cancel: CancellationToken) -> impl Stream<Item = ScanEvent> + Send + 'static {
        let events = scan(Arc::clone(&self.ctx), cancel);
        let store = self.store.clone();
        let notifications = self.notifications.clone();
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                if let ScanEvent::Complete(found) = &event {
                    store.replace(found.clone()).await;
                    let _ = notifications.send(Notification::ImportListChanged);
                }
                yield event;
            }
        })
    }

    /// Size `candidates` and find the files they would replace. `None` if
    /// cancelled.
    pub async fn prepare_import(
        &self,
        candidates: Vec<ImportCandidate>,
        cancel: CancellationToken,
    ) -> Result<Option<ImportPlan>> {
        let ctx = Arc::clone(&self.ctx);
        let prepared = tokio::task::spawn_blocking(move || {
            precompute_import(&ctx, &candidates, &cancel).map(|report| ImportPlan { candidates, report })
        });
        prepared.await.or_raise(|| ErrorKind::Worker)
    }

    /// Size `candidates` and find the output names already taken. `None` if
    /// cancelled.
    pub async fn prepare_export(
        &self,
        candidates: Vec<ExportCandidate>,
        cancel: CancellationToken,
    ) -> Result<Option<ExportPlan>> {
        let ctx = Arc::clone(&self.ctx);
        let prepared = tokio::task::spawn_blocking(move || {
            precompute_export(&ctx, &candidates, &cancel)
                .map(|report| report.map(|report| ExportPlan { candidates, report }))
        });
        prepared.await.or_raise(|| ErrorKind::Worker)?
    }

    /// Start importing `plan`. Cancelling `cancel` interrupts the run.
    ///
    /// # Errors
    ///
    /// [`Busy`](ErrorKind::Busy) while another run is active,
    /// [`ConfirmationRequired`](ErrorKind::ConfirmationRequired) if the plan
    /// replaces files and `confirmed` is false, and
    /// [`Setup`](ErrorKind::Setup) if the destination cannot be resolved.
    pub async fn start_import(
        &self,
        plan: ImportPlan,
        confirmed: bool,
        cancel: CancellationToken,
    ) -> Result<RunHandle> {
        let permit = self.acquire(plan.report.duplicates.len(), confirmed)?;
        let output = self.resolve_output().await?;
        let ctx = Arc::clone(&self.ctx);
        let ImportPlan { candidates, report } = plan;
        tracing::info!(items = candidates.len(), total = report.total_bytes, "starting import");
        Ok(launch(
            cancel,
            Some(permit),
            move |run| import::import(&ctx, &output, &candidates, report.total_bytes, run),
            self.on_finished(),
        ))
    }

    /// Start exporting `plan`. Errors as for
    /// [`start_import`](Self::start_import).
    pub async fn start_export(
        &self,
        plan: ExportPlan,
        confirmed: bool,
        cancel: CancellationToken,
    ) -> Result<RunHandle> {
        let permit = self.acquire(plan.report.duplicates.len(), confirmed)?;
        let output = self.resolve_output().await?;
        let ctx = Arc::clone(&self.ctx);
        let ExportPlan { candidates, report } = plan;
        tracing::info!(items = candidates.len(), total = report.total_bytes, "starting export");
        Ok(launch(
            cancel,
            Some(permit),
            move |run| export::export(&ctx, &output, &candidates, report.total_bytes, run),
            self.on_finished(),
        ))
    }

    fn acquire(&self, duplicates: usize, confirmed: bool) -> Result<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.slot).try_acquire_owned().or_raise(|| ErrorKind::Busy)?;
        if duplicates > 0 && !confirmed {
            exn::bail!(ErrorKind::ConfirmationRequired(duplicates));
        }
        Ok(permit)
    }

    async fn resolve_output(&self) -> Result<apkport_storage::StorageLocation> {
        let ctx = Arc::clone(&self.ctx);
        tokio::task::spawn_blocking(move || ctx.output_dir()).await.or_raise(|| ErrorKind::Worker)?
    }

    fn on_finished(&self) -> impl FnOnce(RunState) + Send + 'static {
        let notifications = self.notifications.clone();
        move |state| {
            // Interrupted runs may still have written files.
            let _ = notifications.send(Notification::ImportListChanged);
            let _ = notifications.send(Notification::StorageChanged);
            tracing::debug!(?state, "run finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Destination;
    use crate::transfer::TransferEvent;
    use apkport_storage::StorageLocation;
    use apkport_storage::tree::MemoryTree;
    use std::fs;

    fn orchestrator(root: &std::path::Path) -> Orchestrator {
        let ctx = Context::new(StorageLocation::direct(root.join("storage")), Destination::Direct(root.join("out")))
            .unwrap();
        Orchestrator::new(ctx)
    }

    #[tokio::test]
    async fn test_refresh_replaces_list_and_notifies() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("storage/Download")).unwrap();
        fs::write(root.join("storage/Download/app.apk"), b"apk").unwrap();
        let orchestrator = orchestrator(root);
        let mut notifications = orchestrator.subscribe();

        let events: Vec<_> = orchestrator.refresh(CancellationToken::new()).collect().await;
        assert!(matches!(events.last(), Some(ScanEvent::Complete(found)) if found.len() == 1));
        assert_eq!(orchestrator.store().len().await, 1);
        assert_eq!(notifications.recv().await.unwrap(), Notification::ImportListChanged);
    }

    #[tokio::test]
    async fn test_duplicates_require_confirmation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("storage")).unwrap();
        let orchestrator = orchestrator(root);
        let plan = ImportPlan {
            candidates: vec![],
            report: DuplicateReport {
                duplicates: vec![crate::precompute::Duplicate {
                    index: 0,
                    existing: StorageLocation::direct(root.join("storage/x")),
                }],
                total_bytes: 0,
            },
        };
        assert!(plan.needs_confirmation());
        let err = orchestrator.start_import(plan.clone(), false, CancellationToken::new()).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::ConfirmationRequired(1)));
        // The rejected request did not keep the slot.
        assert!(!orchestrator.is_busy());

        let handle = orchestrator.start_import(plan, true, CancellationToken::new()).await.unwrap();
        let events: Vec<_> = handle.into_stream().collect().await;
        assert!(matches!(events.last(), Some(TransferEvent::Completed(_))));
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(temp_dir.path());
        let empty = ImportPlan { candidates: vec![], report: DuplicateReport::default() };
        // Holding the slot stands in for a run in progress.
        let held = Arc::clone(&orchestrator.slot).try_acquire_owned().unwrap();
        assert!(orchestrator.is_busy());
        let err = orchestrator.start_import(empty.clone(), false, CancellationToken::new()).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Busy));
        drop(held);
        assert!(orchestrator.start_import(empty, false, CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unresolvable_destination_fails_to_start() {
        let tree = Arc::new(MemoryTree::default());
        tree.set_read_only(true);
        let destination = Destination::Tree { tree, segments: vec!["Apps".into()] };
        let ctx = Context::new(StorageLocation::direct("/nonexistent"), destination).unwrap();
        let orchestrator = Orchestrator::new(ctx);
        let empty = ImportPlan { candidates: vec![], report: DuplicateReport::default() };
        let err = orchestrator.start_import(empty, false, CancellationToken::new()).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Setup(_)));
        assert!(!orchestrator.is_busy());
    }
}
