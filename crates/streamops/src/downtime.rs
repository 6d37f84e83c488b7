//! Downtime windows.
//!
//! Declaring a downtime suspends every running stream whose name starts with
//! a prefix and tags it with the downtime key. Stopping the downtime resumes
//! exactly the streams carrying that key, so overlapping windows declared by
//! different operators never release each other's streams.

use crate::bulk::Mutation;
use crate::definition::{StreamDefinition, DOWNTIME_LABEL};
use crate::error::Result;

/// Suspend running streams matching `prefix` under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclareDowntime {
    pub prefix: String,
    pub key: String,
}

impl DeclareDowntime {
    pub fn new(prefix: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            key: key.into(),
        }
    }
}

impl Mutation for DeclareDowntime {
    fn matches(&self, def: &StreamDefinition) -> bool {
        def.name().starts_with(&self.prefix) && !def.suspended()
    }

    fn mutate(&self, def: &mut StreamDefinition) -> Result<()> {
        if let Some(held) = def.downtime_key() {
            if held != self.key {
                log::debug!("{} already held by downtime {held}", def.id());
                return Ok(());
            }
        }

        let mut labels = def.labels().clone();
        labels.insert(DOWNTIME_LABEL.to_string(), self.key.clone());
        def.set_labels(labels);
        def.set_suspended(true);
        Ok(())
    }

    fn verb(&self) -> &str {
        "suspended"
    }

    fn description(&self) -> String {
        format!(
            "declaring downtime {} for streams prefixed '{}'",
            self.key, self.prefix
        )
    }
}

/// Resume the streams held by `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopDowntime {
    pub key: String,
}

impl StopDowntime {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Mutation for StopDowntime {
    fn matches(&self, def: &StreamDefinition) -> bool {
        def.downtime_key() == Some(self.key.as_str())
    }

    fn mutate(&self, def: &mut StreamDefinition) -> Result<()> {
        let mut labels = def.labels().clone();
        labels.remove(DOWNTIME_LABEL);
        def.set_labels(labels);
        def.set_suspended(false);
        Ok(())
    }

    fn verb(&self) -> &str {
        "started"
    }

    fn description(&self) -> String {
        format!("stopping downtime {}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkEngine, BulkOptions};
    use crate::cancel::CancelToken;
    use crate::report::RecordingReporter;
    use kubestore::backend::memory::{Fault, MemoryBackend};
    use kubestore::{NamespacedName, ResourceKind};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    const CLASS: &str = "arcane-stream-mock";

    fn kind() -> ResourceKind {
        ResourceKind::new("streaming.sneaksanddata.com", "v1", "TestStreamDefinition")
    }

    fn stream(name: &str, suspended: bool, downtime: Option<&str>) -> Value {
        let mut value = json!({
            "metadata": {"name": name, "namespace": "default", "labels": {"team": "data"}},
            "spec": {"suspended": suspended, "source": "mock"}
        });
        if let Some(key) = downtime {
            value["metadata"]["labels"][DOWNTIME_LABEL] = json!(key);
        }
        value
    }

    fn setup(streams: &[(&str, bool, Option<&str>)]) -> Arc<MemoryBackend> {
        let store = Arc::new(MemoryBackend::new());
        store.add_class(CLASS, kind());
        for (name, suspended, downtime) in streams {
            store.insert(&kind(), stream(name, *suspended, *downtime));
        }
        store
    }

    fn options() -> BulkOptions {
        BulkOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            qps: 1000.0,
            ..Default::default()
        }
    }

    fn run(store: &Arc<MemoryBackend>, mutation: &dyn Mutation) -> RecordingReporter {
        let reporter = RecordingReporter::new();
        BulkEngine::new(store, &reporter)
            .with_options(options())
            .run(CLASS, mutation, &CancelToken::new())
            .unwrap();
        reporter
    }

    fn stored(store: &MemoryBackend, name: &str) -> Value {
        store
            .object(&kind(), &NamespacedName::new("default", name))
            .unwrap()
            .into_value()
    }

    #[test]
    fn test_declare_scopes_by_prefix_and_running() {
        let store = setup(&[
            ("abc-1", false, None),
            ("abc-2", true, None),
            ("xyz-1", false, None),
        ]);

        let reporter = run(&store, &DeclareDowntime::new("abc", "K1"));

        let abc1 = stored(&store, "abc-1");
        assert_eq!(abc1["spec"]["suspended"], json!(true));
        assert_eq!(abc1["metadata"]["labels"][DOWNTIME_LABEL], json!("K1"));
        assert_eq!(abc1["metadata"]["labels"]["team"], json!("data"));
        assert_eq!(abc1["spec"]["source"], json!("mock"));

        let abc2 = stored(&store, "abc-2");
        assert!(abc2["metadata"]["labels"].get(DOWNTIME_LABEL).is_none());

        let xyz1 = stored(&store, "xyz-1");
        assert_eq!(xyz1["spec"]["suspended"], json!(false));

        assert_eq!(store.total_update_calls(), 1);
        assert_eq!(
            reporter.lines(),
            vec!["teststreamdefinition.streaming.sneaksanddata.com/default/abc-1 suspended"]
        );
    }

    #[test]
    fn test_declare_labels_every_running_prefix_match() {
        let store = setup(&[
            ("abc-1", false, None),
            ("abc-2", false, None),
            ("xyz-1", false, None),
        ]);

        let reporter = run(&store, &DeclareDowntime::new("abc", "K1"));

        for name in ["abc-1", "abc-2"] {
            let value = stored(&store, name);
            assert_eq!(value["spec"]["suspended"], json!(true), "{name}");
            assert_eq!(value["metadata"]["labels"][DOWNTIME_LABEL], json!("K1"), "{name}");
        }
        let xyz1 = stored(&store, "xyz-1");
        assert_eq!(xyz1["spec"]["suspended"], json!(false));
        assert!(xyz1["metadata"]["labels"].get(DOWNTIME_LABEL).is_none());

        assert_eq!(store.total_update_calls(), 2);
        let mut lines = reporter.lines();
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "teststreamdefinition.streaming.sneaksanddata.com/default/abc-1 suspended",
                "teststreamdefinition.streaming.sneaksanddata.com/default/abc-2 suspended",
            ]
        );
    }

    #[test]
    fn test_declare_does_not_steal_other_key() {
        let store = setup(&[("abc-1", false, Some("K2"))]);

        run(&store, &DeclareDowntime::new("abc", "K1"));

        let abc1 = stored(&store, "abc-1");
        assert_eq!(abc1["metadata"]["labels"][DOWNTIME_LABEL], json!("K2"));
        assert_eq!(abc1["spec"]["suspended"], json!(false));
        assert_eq!(store.total_update_calls(), 0);
    }

    #[test]
    fn test_declare_with_same_key_suspends() {
        let store = setup(&[("abc-1", false, Some("K1"))]);

        run(&store, &DeclareDowntime::new("abc", "K1"));

        assert_eq!(stored(&store, "abc-1")["spec"]["suspended"], json!(true));
    }

    #[test]
    fn test_stop_releases_exact_key_only() {
        let store = setup(&[
            ("abc-1", true, Some("K1")),
            ("abc-2", true, Some("K2")),
            ("abc-3", true, None),
        ]);

        let reporter = run(&store, &StopDowntime::new("K1"));

        let abc1 = stored(&store, "abc-1");
        assert_eq!(abc1["spec"]["suspended"], json!(false));
        assert!(abc1["metadata"]["labels"].get(DOWNTIME_LABEL).is_none());
        assert_eq!(abc1["metadata"]["labels"]["team"], json!("data"));

        let abc2 = stored(&store, "abc-2");
        assert_eq!(abc2["spec"]["suspended"], json!(true));
        assert_eq!(abc2["metadata"]["labels"][DOWNTIME_LABEL], json!("K2"));

        assert_eq!(stored(&store, "abc-3")["spec"]["suspended"], json!(true));
        assert_eq!(
            reporter.lines(),
            vec!["teststreamdefinition.streaming.sneaksanddata.com/default/abc-1 started"]
        );
    }

    #[test]
    fn test_declare_then_stop_restores_streams() {
        let store = setup(&[("abc-1", false, None), ("abc-2", false, None)]);

        run(&store, &DeclareDowntime::new("abc", "K1"));
        run(&store, &StopDowntime::new("K1"));

        for name in ["abc-1", "abc-2"] {
            let value = stored(&store, name);
            assert_eq!(value["spec"]["suspended"], json!(false));
            assert!(value["metadata"]["labels"].get(DOWNTIME_LABEL).is_none());
        }
    }

    #[test]
    fn test_drain_completes_despite_transient_failures() {
        let names: Vec<String> = (0..20).map(|i| format!("abc-{i}")).collect();
        let store = Arc::new(MemoryBackend::new());
        store.add_class(CLASS, kind());
        for name in &names {
            store.insert(&kind(), stream(name, false, None));
        }
        for (i, name) in names.iter().enumerate() {
            let id = NamespacedName::new("default", name.as_str());
            match i % 3 {
                0 => store.inject_update_fault(&kind(), &id, Fault::Network),
                1 => store.inject_update_fault(&kind(), &id, Fault::Conflict),
                _ => {}
            }
        }

        let reporter = RecordingReporter::new();
        let summary = BulkEngine::new(&store, &reporter)
            .with_options(options())
            .run(CLASS, &DeclareDowntime::new("abc", "K1"), &CancelToken::new())
            .unwrap();

        assert_eq!(summary.matched, 20);
        assert_eq!(summary.persisted, 20);
        assert_eq!(summary.dropped, 0);
        for name in &names {
            let value = stored(&store, name);
            assert_eq!(value["spec"]["suspended"], json!(true));
            assert_eq!(value["metadata"]["labels"][DOWNTIME_LABEL], json!("K1"));
        }
    }
}
