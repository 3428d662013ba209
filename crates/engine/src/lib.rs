//! Moving application packages and their data in and out of archives.
//!
//! The engine has three stages, each running on its own blocking worker and
//! reporting back through a stream of events:
//!
//! - [`scan`] finds importable archives beneath the configured roots,
//! - [`precompute`] sizes a batch and finds files it would replace,
//! - [`transfer`] streams the bytes, with throttled progress and speed
//!   reporting and cooperative cancellation.
//!
//! The [`Orchestrator`] sequences them and makes sure only one transfer runs
//! at a time.

mod candidate;
mod context;
pub mod error;
mod orchestrator;
pub mod precompute;
mod request;
pub mod scan;
mod store;
pub mod template;
pub mod transfer;

pub use crate::candidate::{AppRef, CandidateKind, ExportCandidate, ImportCandidate, Inclusion};
pub use crate::context::{Context, Destination};
pub use crate::orchestrator::{ExportPlan, ImportPlan, Notification, Orchestrator};
pub use crate::precompute::{Duplicate, DuplicateReport};
pub use crate::request::{MAX_REQUEST_BYTES, check_request_size};
pub use crate::scan::ScanEvent;
pub use crate::store::CandidateStore;
pub use crate::transfer::{RunHandle, RunState, TransferError, TransferEvent, TransferOutcome, TransferProgress};
