//! Streaming transfer runs.
//!
//! A run copies a batch of candidates on a blocking worker and reports back
//! over a single event channel. Runs move through [`RunState`]:
//! `Idle -> Running -> Completed | Interrupted`. Only cancellation leads to
//! `Interrupted`, and an interrupted run never emits
//! [`Completed`](TransferEvent::Completed).

pub mod export;
pub mod import;
mod naming;
mod progress;

pub use self::naming::NameAllocator;
pub use self::progress::{PROGRESS_THRESHOLD, ProgressMeter, SPEED_INTERVAL, SpeedMeter};

use crate::error::{Error, ErrorKind, Result, describe};
use apkport_storage::StorageLocation;
use async_stream::stream;
use futures::Stream;
use std::fmt::Display;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Size of the buffer used for every streamed copy.
const BUFFER_SIZE: usize = 16 * 1024;

/// Snapshot of a run's progress.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_written: u64,
    pub total_bytes: u64,
    /// The file being written; empty between files.
    pub current_target: String,
    pub speed_bytes_per_sec: u64,
}

/// Events emitted by a transfer run, in order:
/// 1. [`Started`](Self::Started): exactly once.
/// 2. [`ItemStarted`](Self::ItemStarted), [`Progress`](Self::Progress),
///    [`Speed`](Self::Speed) and [`Retry`](Self::Retry): any number of times.
///    Progress byte counts never decrease.
/// 3. [`Completed`](Self::Completed): exactly once, unless interrupted.
#[derive(Clone, Debug)]
pub enum TransferEvent {
    Started { items: usize, total_bytes: u64 },
    ItemStarted { index: usize, name: String },
    Progress(TransferProgress),
    /// Bytes written since the previous speed event, about one second ago.
    Speed(u64),
    /// An export item failed and is being tried again.
    Retry { index: usize, attempt: u32, error: String },
    Completed(TransferOutcome),
}

/// One failed entry or item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferError {
    pub target: String,
    pub description: String,
}

/// What a completed run did.
#[derive(Clone, Debug, Default)]
pub struct TransferOutcome {
    /// In the order the failures happened
    pub errors: Vec<TransferError>,
    /// Files written successfully
    pub artifacts: Vec<StorageLocation>,
    /// Number of items in the batch
    pub items: usize,
}
impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// The error log as one block of text, one `target: description` line per
    /// failure. Empty when nothing failed.
    pub fn report(&self) -> String {
        self.errors.iter().map(|e| format!("{}: {}", e.target, e.description)).collect::<Vec<_>>().join("\n")
    }

    /// The file worth opening after a run: only when exactly one item was
    /// processed, without errors, producing exactly one file.
    pub fn single_artifact(&self) -> Option<&StorageLocation> {
        match (self.items, self.errors.is_empty(), self.artifacts.as_slice()) {
            (1, true, [artifact]) => Some(artifact),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Interrupted,
}

/// Whether a run (or one copy within it) ran to the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Finished,
    Cancelled,
}

/// Worker-side state of one run: the byte counters, the meters and the error
/// log. Owned by the worker; consumers only see the events it sends.
pub struct Run {
    events: UnboundedSender<TransferEvent>,
    cancel: CancellationToken,
    progress: ProgressMeter,
    speed: SpeedMeter,
    written: u64,
    total: u64,
    speed_bytes_per_sec: u64,
    target: String,
    outcome: TransferOutcome,
}

impl Run {
    pub fn new(events: UnboundedSender<TransferEvent>, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            progress: ProgressMeter::default(),
            speed: SpeedMeter::new(),
            written: 0,
            total: 0,
            speed_bytes_per_sec: 0,
            target: String::new(),
            outcome: TransferOutcome::default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Fall back to `written` bytes, discarding what an abandoned attempt
    /// copied. Progress reports stay silent until the count catches up.
    pub fn rewind(&mut self, written: u64) {
        self.written = written.min(self.written);
    }

    pub fn start(&mut self, items: usize, total_bytes: u64) {
        self.total = total_bytes;
        self.outcome.items = items;
        self.send(TransferEvent::Started { items, total_bytes });
    }

    pub fn item_started(&mut self, index: usize, name: impl Into<String>) {
        self.send(TransferEvent::ItemStarted { index, name: name.into() });
    }

    pub fn begin_target(&mut self, target: &StorageLocation) {
        self.target = target.to_string();
    }

    pub fn end_target(&mut self) {
        self.target.clear();
    }

    pub fn produced(&mut self, artifact: StorageLocation) {
        self.outcome.artifacts.push(artifact);
    }

    /// Record a failure against `target` and carry on.
    pub fn fail(&mut self, target: impl Display, err: &Error) {
        self.record(target, describe(err));
    }

    /// Record a failure with a prepared description.
    pub fn record(&mut self, target: impl Display, description: String) {
        tracing::warn!(path = %target, error = %description, "transfer failed");
        self.outcome.errors.push(TransferError { target: target.to_string(), description });
    }

    /// Position in the error log and artifact list, for [`Run::roll_back`].
    pub fn checkpoint(&self) -> (usize, usize) {
        (self.outcome.errors.len(), self.outcome.artifacts.len())
    }

    /// Forget errors and artifacts recorded since `checkpoint`, for an attempt
    /// that is about to be repeated.
    pub fn roll_back(&mut self, (errors, artifacts): (usize, usize)) {
        self.outcome.errors.truncate(errors);
        self.outcome.artifacts.truncate(artifacts);
    }

    pub fn retry(&mut self, index: usize, attempt: u32, err: &Error) {
        let error = describe(err);
        tracing::info!(index, attempt, %error, "retrying");
        self.send(TransferEvent::Retry { index, attempt, error });
    }

    /// Stream everything from `reader` into `writer`, counting bytes as they
    /// are written. Cancellation is checked before every chunk.
    pub fn copy<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<Flow>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut buffer = vec![0; BUFFER_SIZE];
        loop {
            if self.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => exn::bail!(ErrorKind::Io(e)),
            };
            writer.write_all(&buffer[..read]).map_err(ErrorKind::Io)?;
            self.advance(read as u64);
        }
        writer.flush().map_err(ErrorKind::Io)?;
        Ok(Flow::Finished)
    }

    fn advance(&mut self, bytes: u64) {
        self.written += bytes;
        if let Some(speed) = self.speed.record(bytes) {
            self.speed_bytes_per_sec = speed;
            self.send(TransferEvent::Speed(speed));
        }
        if self.progress.update(self.written) {
            self.send_progress();
        }
    }

    fn send_progress(&self) {
        self.send(TransferEvent::Progress(TransferProgress {
            bytes_written: self.written,
            total_bytes: self.total,
            current_target: self.target.clone(),
            speed_bytes_per_sec: self.speed_bytes_per_sec,
        }));
    }

    fn send(&self, event: TransferEvent) {
        // A consumer that went away has no use for further events.
        let _ = self.events.send(event);
    }

    /// Report any unreported progress and send the final event.
    fn complete(mut self) -> TransferOutcome {
        self.end_target();
        if self.progress.flush(self.written) {
            self.send_progress();
        }
        let outcome = self.outcome;
        tracing::info!(items = outcome.items, errors = outcome.errors.len(), "transfer complete");
        let _ = self.events.send(TransferEvent::Completed(outcome.clone()));
        outcome
    }
}

/// Consumer side of a running transfer.
pub struct RunHandle {
    events: UnboundedReceiver<TransferEvent>,
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
    worker: JoinHandle<()>,
}

impl RunHandle {
    /// Ask the run to stop. Files finished before the request stay on disk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Next event, or `None` once the run has ended.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// All remaining events as a stream that ends with the worker.
    pub fn into_stream(self) -> impl Stream<Item = TransferEvent> + Send + 'static {
        let Self { mut events, worker, .. } = self;
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            while let Some(event) = events.recv().await {
                yield event;
            }
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "transfer worker stopped unexpectedly");
            }
        })
    }
}

/// Run `job` on a blocking worker. `finished` is called on the worker once the
/// run has ended, after the final event was sent. The permit, if any, is held
/// until then.
pub(crate) fn launch<J, F>(
    cancel: CancellationToken,
    permit: Option<OwnedSemaphorePermit>,
    job: J,
    finished: F,
) -> RunHandle
where
    J: FnOnce(&mut Run) -> Flow + Send + 'static,
    F: FnOnce(RunState) + Send + 'static,
{
    let (sender, receiver) = unbounded_channel();
    let (state_sender, state) = watch::channel(RunState::Idle);
    let token = cancel.clone();
    let worker = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        state_sender.send_replace(RunState::Running);
        let mut run = Run::new(sender, token);
        // Both arms consume the run, closing the event channel before the
        // state changes.
        let state = match job(&mut run) {
            Flow::Finished => {
                run.complete();
                RunState::Completed
            },
            Flow::Cancelled => {
                tracing::info!(written = run.written(), "transfer interrupted");
                drop(run);
                RunState::Interrupted
            },
        };
        state_sender.send_replace(state);
        finished(state);
    });
    RunHandle { events: receiver, cancel, state, worker }
}
