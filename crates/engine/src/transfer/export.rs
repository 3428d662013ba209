//! Packing installed applications for transfer.
//!
//! An application with nothing but its base package is copied as a bare
//! package. Anything more (data, expansion files or split packages) is packed
//! into a bundle laid out the way import expects it:
//!
//! ```text
//! base.apk                      (or the package's own file name)
//! split_config.arm64_v8a.apk    (split sets only)
//! Android/data/<package>/...    (with data)
//! Android/obb/<package>/...     (with expansion files)
//! ```
//!
//! Existing files at the destination are never replaced; a taken name gets a
//! number appended.

use crate::candidate::ExportCandidate;
use crate::context::Context;
use crate::error::{Error, ErrorKind, Result, describe};
use crate::template::local_now;
use crate::transfer::{Flow, NameAllocator, Run};
use apkport_archive::{
    BASE_PACKAGE_NAME, BUNDLE_COMMENT, MIME_PACKAGE, MIME_ZIP, PACKAGE_EXTENSION, SPLIT_BUNDLE_EXTENSION,
};
use apkport_storage::{StorageLocation, WriteSeek};
use std::io::Write;
use std::path::Path;
use time::OffsetDateTime;
use tracing::instrument;
use zip::ZipWriter;

type BundleWriter = ZipWriter<Box<dyn WriteSeek>>;

/// File name an export of `candidate` is written under, before numbering.
pub(crate) fn target_name(
    ctx: &Context,
    candidate: &ExportCandidate,
    at: OffsetDateTime,
    sequence: usize,
) -> Result<String> {
    let (template, extension) = match (candidate.is_bundle(), candidate.is_split()) {
        (false, _) => (&ctx.package_template, PACKAGE_EXTENSION),
        (true, true) => (&ctx.bundle_template, SPLIT_BUNDLE_EXTENSION),
        (true, false) => (&ctx.bundle_template, ctx.bundle_extension.as_str()),
    };
    template.render_with_ext(&candidate.app, at, sequence, extension)
}

/// An item that could not be exported.
struct Failed {
    target: String,
    error: Error,
}

/// Export every candidate into `output`, retrying failed items up to
/// `ctx.retries` times.
#[instrument(skip_all, fields(items = candidates.len(), output = %output))]
pub fn export(
    ctx: &Context,
    output: &StorageLocation,
    candidates: &[ExportCandidate],
    total_bytes: u64,
    run: &mut Run,
) -> Flow {
    run.start(candidates.len(), total_bytes);
    let at = local_now();
    let mut names = NameAllocator::default();
    for (index, candidate) in candidates.iter().enumerate() {
        if run.is_cancelled() {
            return Flow::Cancelled;
        }
        let name = match target_name(ctx, candidate, at, index + 1) {
            Ok(name) => name,
            Err(e) => {
                run.fail(&candidate.app.package, &e);
                continue;
            },
        };
        run.item_started(index, &name);
        let start = run.written();
        let checkpoint = run.checkpoint();
        let mut attempt = 0;
        loop {
            match export_item(ctx, output, candidate, &name, &mut names, run) {
                Ok(Flow::Finished) => break,
                Ok(Flow::Cancelled) => return Flow::Cancelled,
                Err(failed) if attempt < ctx.retries && !run.is_cancelled() => {
                    attempt += 1;
                    run.retry(index, attempt, &failed.error);
                    run.rewind(start);
                    run.roll_back(checkpoint);
                },
                Err(failed) => {
                    let description = match attempt {
                        0 => describe(&failed.error),
                        n => format!("{} (after {n} retries)", describe(&failed.error)),
                    };
                    run.record(failed.target, description);
                    break;
                },
            }
        }
    }
    Flow::Finished
}

fn export_item(
    ctx: &Context,
    output: &StorageLocation,
    candidate: &ExportCandidate,
    name: &str,
    names: &mut NameAllocator,
    run: &mut Run,
) -> std::result::Result<Flow, Failed> {
    let intended = || output.display_path().join(name).display().to_string();
    let mime = if candidate.is_bundle() { MIME_ZIP } else { MIME_PACKAGE };
    let (target, writer) = names
        .allocate(output, name)
        .and_then(|allocated| output.create_writer(&allocated, mime).map_err(ErrorKind::storage))
        .map_err(|error| Failed { target: intended(), error })?;
    run.begin_target(&target);
    let result = match candidate.is_bundle() {
        true => write_bundle(ctx, candidate, writer, run),
        false => copy_package(&candidate.app.package_file, writer, run),
    };
    match result {
        Ok(Flow::Finished) => {
            tracing::info!(path = %target, "exported");
            run.end_target();
            run.produced(target);
            Ok(Flow::Finished)
        },
        Ok(Flow::Cancelled) => {
            target.discard();
            Ok(Flow::Cancelled)
        },
        Err(error) => {
            run.end_target();
            target.discard();
            Err(Failed { target: target.to_string(), error })
        },
    }
}

fn copy_package(source: &StorageLocation, mut writer: Box<dyn WriteSeek>, run: &mut Run) -> Result<Flow> {
    let mut reader = source.open_read().map_err(ErrorKind::storage)?;
    run.copy(&mut reader, &mut *writer)
}

fn write_bundle(ctx: &Context, candidate: &ExportCandidate, writer: Box<dyn WriteSeek>, run: &mut Run) -> Result<Flow> {
    let app = &candidate.app;
    let mut zip = ZipWriter::new(writer);
    zip.set_comment(BUNDLE_COMMENT);

    let base_name = match candidate.is_split() {
        true => BASE_PACKAGE_NAME.to_string(),
        false => app.package_file.name(),
    };
    let packages = std::iter::once((base_name, &app.package_file))
        .chain(app.splits.iter().map(|split| (split.name(), split)));
    for (entry_name, source) in packages {
        // Without its packages a bundle is useless; fail the whole item.
        if pack_file(ctx, &mut zip, &entry_name, source, run)? == Flow::Cancelled {
            return Ok(Flow::Cancelled);
        }
    }

    let dirs = [(candidate.include_data, app.data_dir()), (candidate.include_obb, app.obb_dir())];
    for (included, dir) in dirs {
        if included && pack_dir(ctx, &mut zip, &dir, run)? == Flow::Cancelled {
            return Ok(Flow::Cancelled);
        }
    }

    let mut inner = zip.finish().map_err(ErrorKind::zip)?;
    inner.flush().map_err(ErrorKind::Io)?;
    Ok(Flow::Finished)
}

/// Pack everything beneath `dir` (relative to main storage) under the same
/// relative path. Files that cannot be read are recorded and left out.
fn pack_dir(ctx: &Context, zip: &mut BundleWriter, dir: &Path, run: &mut Run) -> Result<Flow> {
    let Some(location) = ctx.storage_root.lookup(dir).map_err(ErrorKind::storage)? else {
        tracing::debug!(dir = %dir.display(), "nothing to pack");
        return Ok(Flow::Finished);
    };
    let prefix = entry_path(dir);
    for entry in location.walk().map_err(ErrorKind::storage)? {
        if run.is_cancelled() {
            return Ok(Flow::Cancelled);
        }
        let entry_name = format!("{prefix}/{}", entry_path(&entry.relative));
        if entry.stat.is_dir {
            zip.add_directory(entry_name, ctx.compression.directory_options()).map_err(ErrorKind::zip)?;
            continue;
        }
        match pack_file(ctx, zip, &entry_name, &entry.location, run) {
            Ok(Flow::Finished) => {},
            Ok(Flow::Cancelled) => return Ok(Flow::Cancelled),
            Err(e) => run.fail(&entry.location, &e),
        }
    }
    Ok(Flow::Finished)
}

fn pack_file(
    ctx: &Context,
    zip: &mut BundleWriter,
    entry_name: &str,
    source: &StorageLocation,
    run: &mut Run,
) -> Result<Flow> {
    let size = source.metadata().map_err(ErrorKind::storage)?.size;
    let mut reader = source.open_read().map_err(ErrorKind::storage)?;
    zip.start_file(entry_name, ctx.compression.file_options(size)).map_err(ErrorKind::zip)?;
    let result = run.copy(&mut reader, zip);
    if result.is_err() {
        // A truncated entry must not end up in the bundle.
        if let Err(e) = zip.abort_file() {
            tracing::warn!(entry = %entry_name, error = %e, "could not drop partial entry");
        }
    }
    result
}

/// Archive entry path: components joined with `/` on every platform.
fn entry_path(path: &Path) -> String {
    path.iter().map(|component| component.to_string_lossy()).collect::<Vec<_>>().join("/")
}
