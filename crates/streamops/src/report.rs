//! Per-item outcome reporting
//!
//! The bulk engine reports every persisted or skipped item through a
//! [`Reporter`], so the CLI can print them and tests can inspect them.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use kubestore::ResourceKind;

/// Operation descriptions used in failure lines.
pub mod operation {
    pub const PARSE: &str = "parsing kubernetes object, skipping";
    pub const MUTATE: &str = "modifying object, will retry later";
    pub const CLIENT: &str = "in constructing kubernetes client, will not retry";
    pub const UPDATE: &str = "updating client, will retry later";
    pub const GIVE_UP: &str = "retrying, giving up";
}

/// `<kind>.<group>/<namespace>/<name>`, the identity printed for each item.
pub fn format_identity(kind: &ResourceKind, namespace: &str, name: &str) -> String {
    format!("{}/{namespace}/{name}", kind.group_kind())
}

/// Receives per-item outcomes.
pub trait Reporter: Send + Sync {
    /// An item was mutated and persisted.
    fn persisted(&self, identity: &str, verb: &str);

    /// An item failed during `operation`.
    fn failed(&self, identity: &str, operation: &str, cause: &str);
}

/// Writes successes to stdout and failures to stderr.
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn persisted(&self, identity: &str, verb: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{identity} {verb}");
    }

    fn failed(&self, identity: &str, operation: &str, cause: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{identity} Failed {operation}: {cause}");
    }
}

/// One recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Persisted { identity: String, verb: String },
    Failed { identity: String, operation: String, cause: String },
}

/// Keeps every outcome in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    outcomes: Mutex<Vec<Outcome>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rendered lines, as the console reporter would print them.
    pub fn lines(&self) -> Vec<String> {
        self.outcomes()
            .into_iter()
            .map(|outcome| match outcome {
                Outcome::Persisted { identity, verb } => format!("{identity} {verb}"),
                Outcome::Failed {
                    identity,
                    operation,
                    cause,
                } => format!("{identity} Failed {operation}: {cause}"),
            })
            .collect()
    }

    fn push(&self, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
    }
}

impl Reporter for RecordingReporter {
    fn persisted(&self, identity: &str, verb: &str) {
        self.push(Outcome::Persisted {
            identity: identity.to_string(),
            verb: verb.to_string(),
        });
    }

    fn failed(&self, identity: &str, operation: &str, cause: &str) {
        self.push(Outcome::Failed {
            identity: identity.to_string(),
            operation: operation.to_string(),
            cause: cause.to_string(),
        });
    }
}
