//! Bulk mutation engine.
//!
//! Lists every resource of a stream class, keeps the ones a [`Mutation`]
//! selects, and applies it to each through a rate-limited queue. The caller
//! thread lists and enqueues while a single worker thread drains the queue
//! in parallel. Items are persisted independently: one failing resource
//! never blocks the others.
//!
//! Failed items are retried with backoff. A retry works on a fresh copy of
//! the resource, so a conflict with another writer converges once the
//! mutation is applied to the latest version.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use kubestore::{NamespacedName, ResourceKind, StoreHandle, StoreProvider};

use crate::cancel::CancelToken;
use crate::definition::StreamDefinition;
use crate::error::Result;
use crate::queue::{self, WorkQueue};

type Snapshots = Mutex<HashMap<NamespacedName, StreamDefinition>>;
use crate::report::{format_identity, operation, Reporter};

/// Default number of requeues before an item is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// A change applied to every selected stream.
pub trait Mutation: Send + Sync {
    /// Whether this stream should be processed at all.
    fn matches(&self, def: &StreamDefinition) -> bool;

    /// Apply the change in memory. Leaving `def` untouched means there is
    /// nothing to persist.
    fn mutate(&self, def: &mut StreamDefinition) -> Result<()>;

    /// Past-tense word printed after each persisted stream.
    fn verb(&self) -> &str;

    /// What the mutation does, for logs.
    fn description(&self) -> String;
}

/// Tuning for a bulk run.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOptions {
    /// Restrict listing to one namespace; `None` lists cluster-wide.
    pub namespace: Option<String>,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub qps: f64,
    pub burst: u32,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: queue::DEFAULT_BASE_DELAY,
            max_delay: queue::DEFAULT_MAX_DELAY,
            qps: queue::DEFAULT_QPS,
            burst: queue::DEFAULT_BURST,
        }
    }
}

/// Counts from a finished bulk run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Objects returned by the list call.
    pub listed: usize,
    /// Objects that could not be adapted.
    pub invalid: usize,
    /// Streams selected by the mutation.
    pub matched: usize,
    /// Streams updated in the store.
    pub persisted: usize,
    /// Selected streams that needed no update.
    pub unchanged: usize,
    /// Streams given up on.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct WorkerStats {
    persisted: usize,
    unchanged: usize,
    dropped: usize,
}

/// Runs a [`Mutation`] across a stream class.
pub struct BulkEngine<'a> {
    provider: &'a dyn StoreProvider,
    reporter: &'a dyn Reporter,
    options: BulkOptions,
}

impl<'a> BulkEngine<'a> {
    pub fn new(provider: &'a dyn StoreProvider, reporter: &'a dyn Reporter) -> Self {
        Self {
            provider,
            reporter,
            options: BulkOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: BulkOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply `mutation` to every matching stream of `class`.
    ///
    /// Blocks until every selected stream was persisted, found unchanged or
    /// dropped. Class resolution and listing failures are fatal; per-item
    /// failures are reported and retried. If `cancel` fires before the queue
    /// drains, the cancellation error is returned.
    pub fn run(
        &self,
        class: &str,
        mutation: &dyn Mutation,
        cancel: &CancelToken,
    ) -> Result<BulkSummary> {
        cancel.check()?;
        let store = self.provider.store()?;
        let kind = store.resolve_class(class)?;
        log::info!("{} across {kind}", mutation.description());

        let queue = WorkQueue::with_rate_limiter(Box::new(queue::controller_rate_limiter(
            self.options.base_delay,
            self.options.max_delay,
            self.options.qps,
            self.options.burst,
        )));
        let snapshots = Snapshots::default();

        let (produced, drained, stats) = thread::scope(|scope| {
            let worker = scope.spawn(|| self.work(&kind, mutation, &queue, &snapshots, cancel));

            let produced = self.produce(&store, &kind, mutation, &queue, &snapshots);
            let drained = if produced.is_ok() {
                queue.shut_down_with_drain(cancel)
            } else {
                queue.shut_down();
                Ok(())
            };

            let stats = match worker.join() {
                Ok(stats) => stats,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            (produced, drained, stats)
        });
        let mut summary = produced?;
        drained?;

        summary.persisted = stats.persisted;
        summary.unchanged = stats.unchanged;
        summary.dropped = stats.dropped;
        Ok(summary)
    }

    /// List, adapt and enqueue the selected streams.
    fn produce(
        &self,
        store: &StoreHandle,
        kind: &ResourceKind,
        mutation: &dyn Mutation,
        queue: &WorkQueue<NamespacedName>,
        snapshots: &Snapshots,
    ) -> Result<BulkSummary> {
        let items = store.list(kind, self.options.namespace.as_deref())?;
        let mut summary = BulkSummary {
            listed: items.len(),
            ..Default::default()
        };

        for raw in items {
            let identity = format_identity(kind, raw.namespace(), raw.name());
            match StreamDefinition::adapt(raw) {
                Ok(def) if mutation.matches(&def) => {
                    let id = def.id().clone();
                    // The snapshot must be in place before the worker can see the id.
                    lock(snapshots).insert(id.clone(), def);
                    queue.add(id);
                    summary.matched += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    self.reporter
                        .failed(&identity, operation::PARSE, &e.to_string());
                    summary.invalid += 1;
                }
            }
        }
        log::debug!(
            "{} of {} streams selected, {} still queued",
            summary.matched,
            summary.listed,
            queue.len()
        );
        Ok(summary)
    }

    fn work(
        &self,
        kind: &ResourceKind,
        mutation: &dyn Mutation,
        queue: &WorkQueue<NamespacedName>,
        snapshots: &Snapshots,
        cancel: &CancelToken,
    ) -> WorkerStats {
        let mut stats = WorkerStats::default();

        while let Some(id) = queue.get() {
            if cancel.is_cancelled() {
                queue.done(&id);
                break;
            }
            let identity = format_identity(kind, &id.namespace, &id.name);

            let store = match self.provider.store() {
                Ok(store) => store,
                Err(e) => {
                    self.reporter
                        .failed(&identity, operation::CLIENT, &e.to_string());
                    queue.forget(&id);
                    queue.done(&id);
                    stats.dropped += 1;
                    continue;
                }
            };

            let snapshot = lock(snapshots).remove(&id);
            let outcome = self.process(&store, kind, mutation, &id, &identity, snapshot);
            match outcome {
                Step::Persisted => {
                    queue.forget(&id);
                    stats.persisted += 1;
                }
                Step::Unchanged => {
                    queue.forget(&id);
                    stats.unchanged += 1;
                }
                Step::Dropped => {
                    queue.forget(&id);
                    stats.dropped += 1;
                }
                Step::Retry(cause) => {
                    let requeues = queue.num_requeues(&id);
                    if requeues < self.options.max_retries {
                        log::debug!("{identity}: retry {} of {}", requeues + 1, self.options.max_retries);
                        queue.add_rate_limited(id.clone());
                    } else {
                        log::warn!("{identity}: dropped after {requeues} retries");
                        self.reporter.failed(&identity, operation::GIVE_UP, &cause);
                        queue.forget(&id);
                        stats.dropped += 1;
                    }
                }
            }
            queue.done(&id);
        }
        stats
    }

    fn process(
        &self,
        store: &StoreHandle,
        kind: &ResourceKind,
        mutation: &dyn Mutation,
        id: &NamespacedName,
        identity: &str,
        snapshot: Option<StreamDefinition>,
    ) -> Step {
        let mut def = match snapshot {
            Some(def) => def,
            None => match store.get(kind, id) {
                Ok(raw) => match StreamDefinition::adapt(raw) {
                    Ok(def) => def,
                    Err(e) => {
                        self.reporter.failed(identity, operation::PARSE, &e.to_string());
                        return Step::Dropped;
                    }
                },
                Err(e) if e.is_retryable() => {
                    self.reporter.failed(identity, operation::UPDATE, &e.to_string());
                    return Step::Retry(e.to_string());
                }
                Err(e) => {
                    self.reporter.failed(identity, operation::UPDATE, &e.to_string());
                    return Step::Dropped;
                }
            },
        };

        if !mutation.matches(&def) {
            log::debug!("{identity}: no longer selected");
            return Step::Unchanged;
        }

        let original = def.clone();
        if let Err(e) = mutation.mutate(&mut def) {
            self.reporter.failed(identity, operation::MUTATE, &e.to_string());
            return Step::Retry(e.to_string());
        }
        if !def.differs_from(&original) {
            return Step::Unchanged;
        }

        match store.update(kind, &def.to_raw()) {
            Ok(_) => {
                self.reporter.persisted(identity, mutation.verb());
                Step::Persisted
            }
            Err(e) => {
                self.reporter.failed(identity, operation::UPDATE, &e.to_string());
                Step::Retry(e.to_string())
            }
        }
    }
}

fn lock(
    snapshots: &Snapshots,
) -> MutexGuard<'_, HashMap<NamespacedName, StreamDefinition>> {
    snapshots.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Step {
    Persisted,
    Unchanged,
    Dropped,
    Retry(String),
}
