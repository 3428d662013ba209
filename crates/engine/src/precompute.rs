//! Size accounting and duplicate detection ahead of a transfer run.
//!
//! Nothing here creates or modifies anything at the destination. The report
//! is a snapshot: files appearing between precompute and transfer are not
//! noticed until the transfer itself runs into them.

use crate::candidate::{CandidateKind, ExportCandidate, ImportCandidate};
use crate::context::Context;
use crate::error::{ErrorKind, Result, describe};
use crate::template::local_now;
use crate::transfer::export::target_name;
use apkport_archive::{ArchiveSummary, EntryKind};
use apkport_storage::StorageLocation;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// A destination file that a candidate would write over, or collide with.
#[derive(Clone, Debug)]
pub struct Duplicate {
    /// Position of the candidate in its batch
    pub index: usize,
    pub existing: StorageLocation,
}

/// Result of precomputing a batch.
#[derive(Clone, Debug, Default)]
pub struct DuplicateReport {
    /// In candidate order; a candidate may appear more than once.
    pub duplicates: Vec<Duplicate>,
    /// Bytes the run would write given the inclusion flags.
    pub total_bytes: u64,
}
impl DuplicateReport {
    pub fn has_duplicates(&self) -> bool {
        !self.duplicates.is_empty()
    }

    /// Indices of the candidates with at least one duplicate.
    pub fn affected(&self) -> Vec<usize> {
        let mut indices: Vec<_> = self.duplicates.iter().map(|d| d.index).collect();
        indices.dedup();
        indices
    }
}

/// Precompute an import batch. Returns `None` if cancelled.
///
/// Bare packages are never duplicates since they are copied under a fresh
/// name. Bundle data and expansion entries are duplicates when a file already
/// exists at the same path beneath main storage. Candidates whose archive
/// cannot be read are left out of the total; the transfer reports them.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub fn precompute_import(
    ctx: &Context,
    candidates: &[ImportCandidate],
    cancel: &CancellationToken,
) -> Option<DuplicateReport> {
    let mut report = DuplicateReport::default();
    for (index, candidate) in candidates.iter().enumerate() {
        if cancel.is_cancelled() {
            return None;
        }
        match candidate.kind {
            CandidateKind::Package => {
                if candidate.include.apk {
                    report.total_bytes += candidate.size;
                }
            },
            CandidateKind::Bundle => {
                if let Err(e) = inspect_bundle(ctx, index, candidate, &mut report) {
                    tracing::warn!(source = %candidate.source, error = %describe(&e), "could not inspect archive");
                }
            },
        }
    }
    tracing::debug!(total = report.total_bytes, duplicates = report.duplicates.len(), "import precomputed");
    Some(report)
}

fn inspect_bundle(
    ctx: &Context,
    index: usize,
    candidate: &ImportCandidate,
    report: &mut DuplicateReport,
) -> Result<()> {
    let reader = candidate.source.open_read().map_err(ErrorKind::storage)?;
    let summary = ArchiveSummary::read(reader).map_err(ErrorKind::archive)?;
    let include = candidate.include;
    report.total_bytes += summary.selected_bytes(include.apk, include.data, include.obb);
    for entry in &summary.entries {
        let restored = match entry.kind {
            EntryKind::BulkData => include.data,
            EntryKind::ExpansionData => include.obb,
            EntryKind::Package | EntryKind::Other => false,
        };
        if !restored {
            continue;
        }
        match ctx.storage_root.lookup(&entry.name) {
            Ok(Some(existing)) => report.duplicates.push(Duplicate { index, existing }),
            Ok(None) => {},
            // Unusable entry names fail again, and get reported, during the transfer.
            Err(e) => tracing::debug!(entry = %entry.name, error = %describe(&ErrorKind::storage(e)), "skipping entry"),
        }
    }
    Ok(())
}

/// Precompute an export batch. Returns `None` if cancelled, or an error if
/// the destination cannot be inspected at all.
///
/// A candidate is a duplicate when its rendered file name is already taken at
/// the destination; the export will then pick a numbered name.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub fn precompute_export(
    ctx: &Context,
    candidates: &[ExportCandidate],
    cancel: &CancellationToken,
) -> Result<Option<DuplicateReport>> {
    let output = ctx.find_output_dir()?;
    let at = local_now();
    let mut report = DuplicateReport::default();
    for (index, candidate) in candidates.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match export_size(ctx, candidate) {
            Ok(size) => report.total_bytes += size,
            Err(e) => tracing::warn!(package = %candidate.app.package, error = %describe(&e), "could not size export"),
        }
        let Some(output) = &output else {
            continue;
        };
        let existing = target_name(ctx, candidate, at, index + 1)
            .and_then(|name| output.find(&name).map_err(ErrorKind::storage));
        match existing {
            Ok(Some(existing)) => report.duplicates.push(Duplicate { index, existing }),
            Ok(None) => {},
            Err(e) => tracing::warn!(package = %candidate.app.package, error = %describe(&e), "could not check destination"),
        }
    }
    tracing::debug!(total = report.total_bytes, duplicates = report.duplicates.len(), "export precomputed");
    Ok(Some(report))
}

/// Bytes read from sources when exporting `candidate`.
fn export_size(ctx: &Context, candidate: &ExportCandidate) -> Result<u64> {
    let app = &candidate.app;
    let mut total = app.package_file.metadata().map_err(ErrorKind::storage)?.size;
    for split in &app.splits {
        total += split.metadata().map_err(ErrorKind::storage)?.size;
    }
    let dirs = [(candidate.include_data, app.data_dir()), (candidate.include_obb, app.obb_dir())];
    for (included, dir) in dirs {
        if !included {
            continue;
        }
        if let Some(dir) = ctx.storage_root.lookup(dir).map_err(ErrorKind::storage)? {
            total += dir.total_size().map_err(ErrorKind::storage)?;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{AppRef, Inclusion};
    use crate::context::Destination;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn write(root: &Path, relative: &str, data: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn bundle(path: &Path, entries: &[(&str, &[u8])]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut writer = ZipWriter::new(fs::File::create(path).unwrap());
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn candidate(path: &Path) -> ImportCandidate {
        let location = StorageLocation::direct(path);
        ImportCandidate::new(location.clone(), location.metadata().unwrap())
    }

    fn context(root: &Path) -> Context {
        Context::new(StorageLocation::direct(root.join("storage")), Destination::Direct(root.join("out"))).unwrap()
    }

    #[test]
    fn test_import_totals_and_duplicates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let ctx = context(root);
        write(root, "storage/Android/data/com.example/save.dat", b"old");
        bundle(
            &root.join("in/game.zip"),
            &[
                ("base.apk", &[1; 10]),
                ("Android/data/com.example/save.dat", &[2; 20]),
                ("Android*obb*com.example*main.obb", &[3; 40]),
                ("readme.txt", &[4; 80]),
            ],
        );
        write(root, "in/plain.apk", &[5; 7]);
        let candidates = vec![candidate(&root.join("in/game.zip")), candidate(&root.join("in/plain.apk"))];

        let report = precompute_import(&ctx, &candidates, &CancellationToken::new()).unwrap();
        assert_eq!(report.total_bytes, 10 + 20 + 40 + 7);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].index, 0);
        assert_eq!(
            report.duplicates[0].existing,
            StorageLocation::direct(root.join("storage/Android/data/com.example/save.dat"))
        );
        // Nothing was created.
        assert!(!root.join("out").exists());
        assert!(!root.join("storage/Android/obb").exists());

        let narrowed: Vec<_> = candidates
            .into_iter()
            .map(|c| c.with_inclusion(Inclusion { apk: false, data: false, obb: true }))
            .collect();
        let report = precompute_import(&ctx, &narrowed, &CancellationToken::new()).unwrap();
        assert_eq!(report.total_bytes, 40);
        assert!(!report.has_duplicates());
    }

    #[test]
    fn test_unreadable_archive_is_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        write(root, "in/broken.zip", b"not an archive");
        write(root, "in/ok.apk", &[0; 3]);
        let candidates = vec![candidate(&root.join("in/broken.zip")), candidate(&root.join("in/ok.apk"))];
        let report = precompute_import(&context(root), &candidates, &CancellationToken::new()).unwrap();
        assert_eq!(report.total_bytes, 3);
    }

    #[test]
    fn test_export_sizes_and_name_collisions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let ctx = context(root);
        write(root, "apps/base.apk", &[0; 100]);
        write(root, "apps/split_a.apk", &[0; 10]);
        write(root, "storage/Android/data/com.example/a/b.dat", &[0; 5]);
        write(root, "storage/Android/data/com.example/c.dat", &[0; 6]);
        write(root, "storage/Android/obb/com.example/main.obb", &[0; 50]);
        write(root, "out/com.example-7.zip", b"taken");
        let app = AppRef {
            name: "Example".into(),
            package: "com.example".into(),
            version_name: "1.0".into(),
            version_code: 7,
            package_file: StorageLocation::direct(root.join("apps/base.apk")),
            splits: vec![],
        };
        let mut split_app = app.clone();
        split_app.splits.push(StorageLocation::direct(root.join("apps/split_a.apk")));
        let candidates = vec![
            ExportCandidate::new(app.clone()).with_data(true),
            ExportCandidate::new(app).with_obb(true).with_data(true),
            ExportCandidate::new(split_app),
        ];
        let report = precompute_export(&ctx, &candidates, &CancellationToken::new()).unwrap().unwrap();
        assert_eq!(report.total_bytes, (100 + 11) + (100 + 11 + 50) + 110);
        assert_eq!(report.affected(), vec![0, 1]);
    }

    #[test]
    fn test_export_without_destination_has_no_duplicates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        write(root, "apps/base.apk", &[0; 4]);
        let app = AppRef {
            name: "Example".into(),
            package: "com.example".into(),
            version_name: "1.0".into(),
            version_code: 1,
            package_file: StorageLocation::direct(root.join("apps/base.apk")),
            splits: vec![],
        };
        let ctx = context(root);
        let report =
            precompute_export(&ctx, &[ExportCandidate::new(app)], &CancellationToken::new()).unwrap().unwrap();
        assert_eq!(report.total_bytes, 4);
        assert!(!report.has_duplicates());
        assert!(!root.join("out").exists());
    }

    #[test]
    fn test_cancelled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        write(root, "in/ok.apk", &[0; 3]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(precompute_import(&context(root), &[candidate(&root.join("in/ok.apk"))], &cancel).is_none());
    }
}
