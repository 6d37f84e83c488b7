//! Single-stream start and stop.
//!
//! A transition reads one stream, decides whether it already holds the
//! desired state, and otherwise mutates and persists it. Conflicts with
//! other writers restart the whole read-modify-write cycle after one poll
//! interval; every other failure is returned as-is.

use kubestore::{NamespacedName, StoreProvider};

use crate::cancel::CancelToken;
use crate::clock::{Clock, PollConfig, SystemClock};
use crate::definition::{Phase, StreamDefinition};
use crate::error::{Error, Result};

/// A desired state for a single stream.
pub trait Transition: Send + Sync {
    /// Phase the stream is expected to reach.
    fn desired_phase(&self) -> Phase;

    /// Whether `def` still has to change.
    fn needs_mutation(&self, def: &StreamDefinition) -> bool;

    fn mutate(&self, def: &mut StreamDefinition);
}

/// Resume a suspended stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartStream;

impl Transition for StartStream {
    fn desired_phase(&self) -> Phase {
        Phase::Running
    }

    fn needs_mutation(&self, def: &StreamDefinition) -> bool {
        def.suspended()
    }

    fn mutate(&self, def: &mut StreamDefinition) {
        def.set_suspended(false);
    }
}

/// Suspend a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopStream;

impl Transition for StopStream {
    fn desired_phase(&self) -> Phase {
        Phase::Suspended
    }

    fn needs_mutation(&self, def: &StreamDefinition) -> bool {
        !def.suspended()
    }

    fn mutate(&self, def: &mut StreamDefinition) {
        def.set_suspended(true);
    }
}

/// Drives one stream to a [`Transition`]'s desired state.
pub struct TransitionController<'a> {
    provider: &'a dyn StoreProvider,
    clock: &'a dyn Clock,
    poll: PollConfig,
}

impl<'a> TransitionController<'a> {
    pub fn new(provider: &'a dyn StoreProvider) -> Self {
        Self {
            provider,
            clock: &SystemClock,
            poll: PollConfig::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Apply `transition` to stream `id` of `class`.
    ///
    /// Returns the persisted stream. If the stream already holds the desired
    /// state nothing is written and [`Error::NoOp`] is returned.
    pub fn run(
        &self,
        class: &str,
        id: &NamespacedName,
        transition: &dyn Transition,
        cancel: &CancelToken,
    ) -> Result<StreamDefinition> {
        let mut attempts = 0u32;
        loop {
            cancel.check()?;
            attempts += 1;

            match self.attempt(class, id, transition) {
                Err(e) if e.is_conflict() => {
                    if self.poll.exhausted(attempts) {
                        return Err(Error::RetriesExhausted {
                            attempts,
                            last: e.to_string(),
                        });
                    }
                    log::debug!("{id}: {e}; retrying in {:?}", self.poll.interval);
                    self.clock.sleep(self.poll.interval, cancel)?;
                }
                outcome => return outcome,
            }
        }
    }

    fn attempt(
        &self,
        class: &str,
        id: &NamespacedName,
        transition: &dyn Transition,
    ) -> Result<StreamDefinition> {
        let store = self.provider.store()?;
        let kind = store.resolve_class(class)?;
        let mut def = StreamDefinition::adapt(store.get(&kind, id)?)?;

        if !transition.needs_mutation(&def) {
            return Err(Error::NoOp {
                phase: transition.desired_phase(),
                name: id.clone(),
            });
        }

        transition.mutate(&mut def);
        let updated = store.update(&kind, &def.to_raw())?;
        log::info!("{id} moved towards {}", transition.desired_phase());
        StreamDefinition::adapt(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RecordingClock;
    use kubestore::backend::memory::{Fault, MemoryBackend};
    use kubestore::ResourceKind;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const CLASS: &str = "arcane-stream-mock";

    fn kind() -> ResourceKind {
        ResourceKind::new("streaming.sneaksanddata.com", "v1", "TestStreamDefinition")
    }

    fn setup(suspended: bool) -> (Arc<MemoryBackend>, NamespacedName) {
        let store = Arc::new(MemoryBackend::new());
        store.add_class(CLASS, kind());
        let item = store.insert(
            &kind(),
            json!({
                "metadata": {"name": "abc-1", "namespace": "default"},
                "spec": {"suspended": suspended},
                "status": {"phase": if suspended { "Suspended" } else { "Running" }}
            }),
        );
        (store, item.namespaced_name())
    }

    #[test]
    fn test_stop_suspends_running_stream() {
        let (store, id) = setup(false);
        let clock = RecordingClock::new();

        let def = TransitionController::new(&store)
            .with_clock(&clock)
            .run(CLASS, &id, &StopStream, &CancelToken::new())
            .unwrap();

        assert!(def.suspended());
        assert_eq!(store.update_calls(&kind(), &id), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_start_resumes_suspended_stream() {
        let (store, id) = setup(true);

        let def = TransitionController::new(&store)
            .with_clock(&RecordingClock::new())
            .run(CLASS, &id, &StartStream, &CancelToken::new())
            .unwrap();

        assert!(!def.suspended());
        let stored = store.object(&kind(), &id).unwrap();
        assert_eq!(stored.value()["spec"]["suspended"], json!(false));
    }

    #[test]
    fn test_already_in_state_is_no_op_without_updates() {
        let (store, id) = setup(true);

        let err = TransitionController::new(&store)
            .run(CLASS, &id, &StopStream, &CancelToken::new())
            .unwrap_err();

        assert!(err.is_no_op());
        assert_eq!(
            err.to_string(),
            "Stream already has desired phase Suspended: default/abc-1"
        );
        assert_eq!(store.update_calls(&kind(), &id), 0);
    }

    #[test]
    fn test_conflict_retries_after_one_interval() {
        let (store, id) = setup(false);
        store.inject_update_fault(&kind(), &id, Fault::Conflict);
        let clock = RecordingClock::new();

        let def = TransitionController::new(&store)
            .with_clock(&clock)
            .run(CLASS, &id, &StopStream, &CancelToken::new())
            .unwrap();

        assert!(def.suspended());
        assert_eq!(store.update_calls(&kind(), &id), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn test_repeated_conflicts_converge() {
        let (store, id) = setup(false);
        for _ in 0..3 {
            store.inject_update_fault(&kind(), &id, Fault::Conflict);
        }
        let clock = RecordingClock::new();

        let def = TransitionController::new(&store)
            .with_clock(&clock)
            .with_poll(PollConfig {
                interval: Duration::from_millis(250),
                max_attempts: None,
            })
            .run(CLASS, &id, &StopStream, &CancelToken::new())
            .unwrap();

        assert!(def.suspended());
        assert_eq!(store.update_calls(&kind(), &id), 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn test_unfamiliar_phase_does_not_block_stop() {
        let store = Arc::new(MemoryBackend::new());
        store.add_class(CLASS, kind());
        let item = store.insert(
            &kind(),
            json!({
                "metadata": {"name": "abc-1", "namespace": "default"},
                "spec": {"suspended": false},
                "status": {"phase": "Restarting"}
            }),
        );
        let id = item.namespaced_name();

        let def = TransitionController::new(&store)
            .with_clock(&RecordingClock::new())
            .run(CLASS, &id, &StopStream, &CancelToken::new())
            .unwrap();

        assert!(def.suspended());
        assert_eq!(def.phase(), &Phase::Other("Restarting".to_string()));
        assert_eq!(store.update_calls(&kind(), &id), 1);
    }

    #[test]
    fn test_bounded_attempts_give_up() {
        let (store, id) = setup(false);
        for _ in 0..3 {
            store.inject_update_fault(&kind(), &id, Fault::Conflict);
        }
        let clock = RecordingClock::new();

        let err = TransitionController::new(&store)
            .with_clock(&clock)
            .with_poll(PollConfig {
                interval: Duration::from_millis(250),
                max_attempts: Some(2),
            })
            .run(CLASS, &id, &StopStream, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }

    #[test]
    fn test_non_conflict_errors_are_fatal() {
        let (store, id) = setup(false);
        store.inject_update_fault(&kind(), &id, Fault::Network);
        let clock = RecordingClock::new();

        let err = TransitionController::new(&store)
            .with_clock(&clock)
            .run(CLASS, &id, &StopStream, &CancelToken::new())
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(clock.sleeps().is_empty());
        assert_eq!(store.update_calls(&kind(), &id), 1);
    }

    #[test]
    fn test_missing_stream_and_class() {
        let (store, _) = setup(false);
        let controller = TransitionController::new(&store);

        let missing = NamespacedName::new("default", "nope");
        let err = controller
            .run(CLASS, &missing, &StopStream, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Store(kubestore::Error::NotFound(_))));

        let id = NamespacedName::new("default", "abc-1");
        let err = controller
            .run("unknown-class", &id, &StopStream, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Store(kubestore::Error::ClassNotFound(_))));
    }

    #[test]
    fn test_malformed_stream_is_fatal() {
        let store = Arc::new(MemoryBackend::new());
        store.add_class(CLASS, kind());
        let item = store.insert(
            &kind(),
            json!({"metadata": {"name": "abc-1", "namespace": "default"}, "spec": "oops"}),
        );

        let err = TransitionController::new(&store)
            .run(CLASS, &item.namespaced_name(), &StopStream, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let (store, id) = setup(false);
        let token = CancelToken::new();
        token.cancel();

        let err = TransitionController::new(&store)
            .run(CLASS, &id, &StopStream, &token)
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(store.update_calls(&kind(), &id), 0);
    }
}
