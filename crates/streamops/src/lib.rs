//! # streamops
//!
//! Mutation engine behind `kubectl-arcane`: pausing and resuming streams,
//! declaring and lifting downtime windows across many streams, and
//! submitting backfill requests.
//!
//! ## Components
//!
//! - [`definition`]: typed view over stream resources of any stream class
//! - [`bulk`]: list, filter and mutate many streams through a rate-limited
//!   queue drained by one worker
//! - [`downtime`]: the declare/stop downtime mutations
//! - [`transition`]: start or stop one stream, retrying on conflicts
//! - [`backfill`]: create a backfill request and optionally wait for it
//!
//! Every component talks to the cluster through a
//! [`kubestore::StoreProvider`], and every blocking wait honors a
//! [`CancelToken`].
//!
//! ## Example
//!
//! ```no_run
//! use kubestore::backend::http::{HttpBackend, DEFAULT_SERVER};
//! use kubestore::{LazyStore, NamespacedName, StoreHandle};
//! use std::sync::Arc;
//! use streamops::{CancelToken, StopStream, TransitionController};
//!
//! let provider = LazyStore::new(|| Ok(Arc::new(HttpBackend::new(DEFAULT_SERVER, None)) as StoreHandle));
//! let id = NamespacedName::new("default", "my-stream");
//!
//! match TransitionController::new(&provider).run("arcane-stream-mock", &id, &StopStream, &CancelToken::new()) {
//!     Ok(stream) => println!("{} suspended", stream.name()),
//!     Err(e) if e.is_no_op() => println!("{e}"),
//!     Err(e) => eprintln!("failed: {e}"),
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod backfill;
pub mod bulk;
/// Cancellation tokens with deadlines.
pub mod cancel;
/// Injectable clock and poll settings.
pub mod clock;
pub mod definition;
pub mod downtime;
/// Error types for stream operations.
pub mod error;
pub mod queue;
pub mod report;
pub mod transition;

pub use backfill::{BackfillOptions, BackfillRequest, BackfillWatcher, FIELD_MANAGER};
pub use bulk::{BulkEngine, BulkOptions, BulkSummary, Mutation, DEFAULT_MAX_RETRIES};
pub use cancel::CancelToken;
pub use clock::{Clock, PollConfig, RecordingClock, SystemClock, DEFAULT_POLL_INTERVAL};
pub use definition::{Phase, StreamDefinition, DOWNTIME_LABEL};
pub use downtime::{DeclareDowntime, StopDowntime};
pub use error::{Error, Result};
pub use report::{format_identity, ConsoleReporter, RecordingReporter, Reporter};
pub use transition::{StartStream, StopStream, Transition, TransitionController};
