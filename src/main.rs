mod cli;

use crate::cli::{Cli, Commands};
use apkport_config::Settings;
use apkport_engine::{
    AppRef, Context, ExportCandidate, ImportCandidate, Inclusion, Orchestrator, RunHandle, ScanEvent, TransferEvent,
    check_request_size,
};
use apkport_storage::StorageLocation;
use clap::Parser;
use derive_more::{Display, Error};
use exn::ResultExt;
use futures::StreamExt;
use std::path::PathBuf;
use std::pin::pin;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

type Error = exn::Exn<ErrorKind>;
type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("{_0}")]
    Config(#[error(not(source))] String),
    #[display("{_0}")]
    Engine(#[error(not(source))] String),
    #[display("cannot read {}", _0.display())]
    Input(#[error(not(source))] PathBuf),
}

fn config_error(err: apkport_config::error::Error) -> Error {
    let message = (*err).to_string();
    err.raise(ErrorKind::Config(message))
}

fn engine_error(err: apkport_engine::error::Error) -> Error {
    let message = (*err).to_string();
    err.raise(ErrorKind::Engine(message))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            eprintln!("error: {}", &*err);
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::CheckRequest { file } = &cli.command {
        let bytes = std::fs::read(file).or_raise(|| ErrorKind::Input(file.clone()))?;
        check_request_size(&bytes).map_err(engine_error)?;
        println!("{} bytes, within limit", bytes.len());
        return Ok(ExitCode::SUCCESS);
    }

    let settings = Settings::load(cli.config.as_deref()).map_err(config_error)?;
    let ctx = Context::from_settings(&settings).map_err(engine_error)?;
    let orchestrator = Orchestrator::new(ctx);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Scan => {
            let Some(candidates) = refresh(&orchestrator, &cancel).await else {
                return Ok(ExitCode::from(130));
            };
            for candidate in &candidates {
                println!("{:>12}  {:?}  {}", candidate.size, candidate.kind, candidate.source);
            }
            Ok(ExitCode::SUCCESS)
        },
        Commands::Import { yes, no_apk, no_data, no_obb, filter } => {
            let Some(candidates) = refresh(&orchestrator, &cancel).await else {
                return Ok(ExitCode::from(130));
            };
            let include = Inclusion { apk: !no_apk, data: !no_data, obb: !no_obb };
            let selected: Vec<_> = candidates
                .into_iter()
                .filter(|candidate| matches_filter(candidate, &filter))
                .map(|candidate| candidate.with_inclusion(include))
                .collect();
            if selected.is_empty() {
                println!("nothing to import");
                return Ok(ExitCode::SUCCESS);
            }
            let Some(plan) = orchestrator.prepare_import(selected, cancel.clone()).await.map_err(engine_error)? else {
                return Ok(ExitCode::from(130));
            };
            for duplicate in &plan.report.duplicates {
                eprintln!("would replace {}", duplicate.existing);
            }
            let handle = orchestrator.start_import(plan, yes, cancel).await.map_err(engine_error)?;
            follow(handle).await
        },
        Commands::Export { package, name, version_name, version_code, apk, splits, data, obb, yes } => {
            let app = AppRef {
                name: name.unwrap_or_else(|| package.clone()),
                package,
                version_name,
                version_code,
                package_file: StorageLocation::direct(apk),
                splits: splits.into_iter().map(StorageLocation::direct).collect(),
            };
            let candidates = vec![ExportCandidate::new(app).with_data(data).with_obb(obb)];
            let Some(plan) = orchestrator.prepare_export(candidates, cancel.clone()).await.map_err(engine_error)? else {
                return Ok(ExitCode::from(130));
            };
            for duplicate in &plan.report.duplicates {
                eprintln!("{} exists, a numbered name will be used", duplicate.existing);
            }
            let handle = orchestrator.start_export(plan, yes, cancel).await.map_err(engine_error)?;
            follow(handle).await
        },
        Commands::CheckRequest { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn matches_filter(candidate: &ImportCandidate, filter: &[String]) -> bool {
    if filter.is_empty() {
        return true;
    }
    let name = candidate.name.to_lowercase();
    filter.iter().any(|f| name.contains(&f.to_lowercase()))
}

/// Scan and return the refreshed candidate list, or `None` if interrupted.
async fn refresh(orchestrator: &Orchestrator, cancel: &CancellationToken) -> Option<Vec<ImportCandidate>> {
    let mut events = pin!(orchestrator.refresh(cancel.clone()));
    while let Some(event) = events.next().await {
        match event {
            ScanEvent::Started { roots } => tracing::debug!(roots, "scanning"),
            ScanEvent::Discovered(candidate) => tracing::debug!(source = %candidate.source, "found"),
            ScanEvent::Failed { path, error } => tracing::warn!(path = %path, error = %error, "could not scan"),
            ScanEvent::Complete(candidates) => {
                tracing::info!(candidates = candidates.len(), "scan complete");
                return Some(candidates);
            },
        }
    }
    None
}

/// Drain a transfer's events and turn its outcome into an exit code.
async fn follow(handle: RunHandle) -> Result<ExitCode> {
    let mut events = pin!(handle.into_stream());
    let mut outcome = None;
    while let Some(event) = events.next().await {
        match event {
            TransferEvent::Started { items, total_bytes } => tracing::info!(items, total_bytes, "transfer started"),
            TransferEvent::ItemStarted { index, name } => tracing::info!(item = index + 1, name = %name, "transferring"),
            TransferEvent::Progress(progress) => {
                let percent = match progress.total_bytes {
                    0 => 100,
                    total => progress.bytes_written.saturating_mul(100) / total,
                };
                tracing::info!(percent, written = progress.bytes_written, path = %progress.current_target, "progress");
            },
            TransferEvent::Speed(bytes_per_sec) => tracing::debug!(bytes_per_sec, "speed"),
            TransferEvent::Retry { index, attempt, error } => {
                tracing::warn!(item = index + 1, attempt, error = %error, "retrying");
            },
            TransferEvent::Completed(done) => outcome = Some(done),
        }
    }
    let Some(outcome) = outcome else {
        eprintln!("interrupted");
        return Ok(ExitCode::from(130));
    };
    if !outcome.is_success() {
        eprintln!("{}", outcome.report());
        return Ok(ExitCode::FAILURE);
    }
    if let Some(artifact) = outcome.single_artifact() {
        println!("{artifact}");
    }
    Ok(ExitCode::SUCCESS)
}
