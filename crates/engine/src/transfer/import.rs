//! Restoring packages and bundles.
//!
//! Bundle entries are routed by their path: data and expansion files go back
//! to the same relative path beneath main storage, replacing what is there,
//! while packages go to the output directory under a free name.

use crate::candidate::{CandidateKind, ImportCandidate};
use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::transfer::{Flow, NameAllocator, Run};
use apkport_archive::{EntryKind, MIME_BINARY, MIME_PACKAGE, classify, normalize_entry_name};
use apkport_storage::{StorageLocation, WriteSeek, validate_path};
use exn::OptionExt;
use std::io::Read;
use std::path::Path;
use tracing::instrument;
use zip::ZipArchive;

/// Import every candidate into `output` (packages) and main storage (data
/// and expansion files).
#[instrument(skip_all, fields(items = candidates.len(), output = %output))]
pub fn import(
    ctx: &Context,
    output: &StorageLocation,
    candidates: &[ImportCandidate],
    total_bytes: u64,
    run: &mut Run,
) -> Flow {
    run.start(candidates.len(), total_bytes);
    let mut names = NameAllocator::default();
    for (index, candidate) in candidates.iter().enumerate() {
        if run.is_cancelled() {
            return Flow::Cancelled;
        }
        run.item_started(index, &candidate.name);
        let flow = match candidate.kind {
            CandidateKind::Package => import_package(output, candidate, &mut names, run),
            CandidateKind::Bundle => import_bundle(ctx, output, candidate, &mut names, run),
        };
        if flow == Flow::Cancelled {
            return Flow::Cancelled;
        }
    }
    Flow::Finished
}

fn import_package(
    output: &StorageLocation,
    candidate: &ImportCandidate,
    names: &mut NameAllocator,
    run: &mut Run,
) -> Flow {
    if !candidate.include.apk {
        tracing::debug!(source = %candidate.source, "package excluded");
        return Flow::Finished;
    }
    let mut reader = match candidate.source.open_read() {
        Ok(reader) => reader,
        Err(e) => {
            run.fail(&candidate.source, &ErrorKind::storage(e));
            return Flow::Finished;
        },
    };
    let opened = names
        .allocate(output, &candidate.name)
        .and_then(|name| output.create_writer(&name, MIME_PACKAGE).map_err(ErrorKind::storage));
    match opened {
        Ok((target, writer)) => write_target(run, &mut reader, target, writer, true),
        Err(e) => {
            run.fail(output.display_path().join(&candidate.name).display(), &e);
            Flow::Finished
        },
    }
}

fn import_bundle(
    ctx: &Context,
    output: &StorageLocation,
    candidate: &ImportCandidate,
    names: &mut NameAllocator,
    run: &mut Run,
) -> Flow {
    let opened = candidate
        .source
        .open_read()
        .map_err(ErrorKind::storage)
        .and_then(|reader| ZipArchive::new(reader).map_err(ErrorKind::zip));
    let mut archive = match opened {
        Ok(archive) => archive,
        Err(e) => {
            run.fail(&candidate.source, &e);
            return Flow::Finished;
        },
    };
    let include = candidate.include;
    for index in 0..archive.len() {
        if run.is_cancelled() {
            return Flow::Cancelled;
        }
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                run.fail(format!("{}#{index}", candidate.source), &ErrorKind::zip(e));
                continue;
            },
        };
        if entry.is_dir() {
            continue;
        }
        let name = normalize_entry_name(entry.name());
        let kind = classify(&name);
        let included = match kind {
            EntryKind::BulkData => include.data,
            EntryKind::ExpansionData => include.obb,
            EntryKind::Package => include.apk,
            EntryKind::Other => false,
        };
        if !included {
            tracing::trace!(entry = %name, kind = kind.as_str(), "skipping entry");
            continue;
        }
        let (base, opened) = match kind {
            EntryKind::Package => (
                output,
                names
                    .allocate(output, &name)
                    .and_then(|allocated| output.create_writer(&allocated, MIME_PACKAGE).map_err(ErrorKind::storage)),
            ),
            _ => (&ctx.storage_root, restore_target(&ctx.storage_root, &name, kind)),
        };
        let flow = match opened {
            Ok((target, writer)) => write_target(run, &mut entry, target, writer, kind == EntryKind::Package),
            Err(e) => {
                run.fail(base.display_path().join(&name).display(), &e);
                Flow::Finished
            },
        };
        if flow == Flow::Cancelled {
            return Flow::Cancelled;
        }
    }
    Flow::Finished
}

/// Open the file a data or expansion entry restores to, creating parent
/// directories and replacing an existing file.
fn restore_target(
    root: &StorageLocation,
    name: &str,
    kind: EntryKind,
) -> Result<(StorageLocation, Box<dyn WriteSeek>)> {
    let path = validate_path(name).map_err(ErrorKind::storage)?;
    // `..` segments are resolved by validation; the result must stay where
    // the entry said it belongs.
    if classify(&path.to_string_lossy()) != kind {
        exn::bail!(ErrorKind::Archive(format!("entry leaves its directory: {name}")));
    }
    let file_name = path
        .file_name()
        .and_then(|file_name| file_name.to_str())
        .ok_or_raise(|| ErrorKind::Archive(format!("unusable entry name: {name}")))?;
    let parent = path.parent().unwrap_or(Path::new(""));
    let dir = root.resolve_dir(parent).map_err(ErrorKind::storage)?;
    dir.overwrite(file_name, MIME_BINARY).map_err(ErrorKind::storage)
}

/// Copy `reader` into a freshly opened target. The partial file is removed
/// on failure or cancellation.
fn write_target<R: Read + ?Sized>(
    run: &mut Run,
    reader: &mut R,
    target: StorageLocation,
    mut writer: Box<dyn WriteSeek>,
    artifact: bool,
) -> Flow {
    run.begin_target(&target);
    let result = run.copy(reader, &mut *writer);
    // Close before anything is deleted.
    drop(writer);
    match result {
        Ok(Flow::Finished) => {
            tracing::debug!(path = %target, "written");
            run.end_target();
            if artifact {
                run.produced(target);
            }
            Flow::Finished
        },
        Ok(Flow::Cancelled) => {
            target.discard();
            Flow::Cancelled
        },
        Err(e) => {
            run.end_target();
            target.discard();
            run.fail(&target, &e);
            Flow::Finished
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Inclusion;
    use crate::context::Destination;
    use crate::transfer::{TransferEvent, TransferOutcome};
    use std::fs;
    use std::io::Write;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio_util::sync::CancellationToken;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

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

    fn run_import(root: &Path, candidates: &[ImportCandidate]) -> TransferOutcome {
        let ctx = Context::new(StorageLocation::direct(root.join("storage")), Destination::Direct(root.join("out")))
            .unwrap();
        let output = ctx.output_dir().unwrap();
        let (sender, mut receiver) = unbounded_channel();
        let mut run = Run::new(sender, CancellationToken::new());
        assert_eq!(import(&ctx, &output, candidates, 0, &mut run), Flow::Finished);
        run.complete();
        let mut outcome = None;
        while let Ok(event) = receiver.try_recv() {
            if let TransferEvent::Completed(completed) = event {
                outcome = Some(completed);
            }
        }
        outcome.unwrap()
    }

    #[test]
    fn test_bundle_entries_are_routed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("storage/Android/data/com.example")).unwrap();
        fs::write(root.join("storage/Android/data/com.example/save.dat"), b"old").unwrap();
        bundle(
            &root.join("in/game.zip"),
            &[
                ("Game.apk", b"package"),
                ("Android/data/com.example/save.dat", b"new"),
                ("Android*obb*com.example*main.obb", b"obb"),
                ("readme.txt", b"ignored"),
            ],
        );
        let outcome = run_import(root, &[candidate(&root.join("in/game.zip"))]);
        assert!(outcome.is_success(), "{}", outcome.report());
        assert_eq!(fs::read(root.join("out/Game.apk")).unwrap(), b"package");
        assert_eq!(fs::read(root.join("storage/Android/data/com.example/save.dat")).unwrap(), b"new");
        assert_eq!(fs::read(root.join("storage/Android/obb/com.example/main.obb")).unwrap(), b"obb");
        assert!(!root.join("out/readme.txt").exists());
        assert_eq!(outcome.single_artifact(), Some(&StorageLocation::direct(root.join("out/Game.apk"))));
    }

    #[test]
    fn test_inclusion_flags() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        bundle(
            &root.join("in/game.zip"),
            &[("Game.apk", b"package"), ("Android/data/p/a", b"a"), ("Android/obb/p/b", b"b")],
        );
        let only_obb = candidate(&root.join("in/game.zip")).with_inclusion(Inclusion { apk: false, data: false, obb: true });
        let outcome = run_import(root, &[only_obb]);
        assert!(outcome.is_success());
        assert!(!root.join("out/Game.apk").exists());
        assert!(!root.join("storage/Android/data/p/a").exists());
        assert!(root.join("storage/Android/obb/p/b").exists());
    }

    #[test]
    fn test_escaping_entry_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        bundle(&root.join("in/evil.zip"), &[("Android/data/../../../escape.txt", b"x"), ("Android/obb/p/ok", b"y")]);
        let outcome = run_import(root, &[candidate(&root.join("in/evil.zip"))]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(!root.join("storage/escape.txt").exists());
        assert!(!root.join("escape.txt").exists());
        assert!(root.join("storage/Android/obb/p/ok").exists());
    }

    #[test]
    fn test_bare_package_is_copied_under_free_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("in")).unwrap();
        fs::create_dir_all(root.join("out")).unwrap();
        fs::write(root.join("in/app.apk"), b"fresh").unwrap();
        fs::write(root.join("out/app.apk"), b"existing").unwrap();
        let outcome = run_import(root, &[candidate(&root.join("in/app.apk"))]);
        assert!(outcome.is_success());
        assert_eq!(fs::read(root.join("out/app.apk")).unwrap(), b"existing");
        assert_eq!(fs::read(root.join("out/app1.apk")).unwrap(), b"fresh");
    }

    #[test]
    fn test_unreadable_source_is_recorded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("in")).unwrap();
        fs::write(root.join("in/broken.zip"), b"garbage").unwrap();
        let broken = candidate(&root.join("in/broken.zip"));
        let outcome = run_import(root, &[broken]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].target, root.join("in/broken.zip").display().to_string());
        assert!(outcome.errors[0].description.starts_with("archive error"));
    }
}
