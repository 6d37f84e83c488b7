//! In-process backend.
//!
//! [`MemoryBackend`] keeps objects in a map and mimics the API server
//! behaviors the engine relies on: monotonically increasing resource
//! versions, conflict detection on stale updates, `generateName`, and
//! watches that replay changes after a given resource version.
//!
//! Faults can be queued per object to exercise retry paths, and every
//! update call is counted.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::backend::ResourceStore;
use crate::error::{Error, Result};
use crate::types::{
    CreateOptions, EventStream, EventType, NamespacedName, RawItem, ResourceKind, WatchEvent,
    WatchParams,
};

/// A failure to inject into the next update of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Another actor wins the race: the stored version is bumped and the
    /// update is rejected as stale.
    Conflict,
    /// The server is unreachable.
    Network,
    /// The server rejects the object.
    Validation,
}

type ObjectKey = (String, String, String);

struct Watcher {
    plural: String,
    params: WatchParams,
    tx: Sender<WatchEvent>,
}

#[derive(Default)]
struct State {
    classes: HashMap<String, ResourceKind>,
    objects: BTreeMap<ObjectKey, RawItem>,
    version: u64,
    generated: u64,
    history: Vec<(String, u64, WatchEvent)>,
    watchers: Vec<Watcher>,
    faults: HashMap<ObjectKey, VecDeque<Fault>>,
    update_calls: HashMap<ObjectKey, usize>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn record(&mut self, plural: &str, event_type: EventType, object: &RawItem) {
        let event = WatchEvent {
            event_type,
            object: object.clone(),
        };
        self.watchers.retain(|w| {
            if w.plural != plural || !w.params.matches(object) {
                return true;
            }
            w.tx.send(event.clone()).is_ok()
        });
        self.history.push((plural.to_string(), self.version, event));
    }
}

fn key(kind: &ResourceKind, namespace: &str, name: &str) -> ObjectKey {
    (kind.plural.clone(), namespace.to_string(), name.to_string())
}

/// In-memory resource store.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a stream class pointing at `kind`.
    pub fn add_class(&self, name: impl Into<String>, kind: ResourceKind) {
        self.state().classes.insert(name.into(), kind);
    }

    /// Store an object as-is, assigning a fresh resource version.
    pub fn insert(&self, kind: &ResourceKind, value: Value) -> RawItem {
        let mut state = self.state();
        let mut item = RawItem::new(value);
        let version = state.next_version();
        item.set_resource_version(version);

        let object_key = key(kind, item.namespace(), item.name());
        state.record(&kind.plural, EventType::Added, &item);
        state.objects.insert(object_key, item.clone());
        item
    }

    /// Modify an object as an external actor would, bumping its version and
    /// notifying watchers.
    pub fn patch(
        &self,
        kind: &ResourceKind,
        id: &NamespacedName,
        change: impl FnOnce(&mut Value),
    ) -> Result<RawItem> {
        let mut state = self.state();
        let object_key = key(kind, &id.namespace, &id.name);
        let mut item = state
            .objects
            .get(&object_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        change(item.value_mut());
        let version = state.next_version();
        item.set_resource_version(version);
        state.record(&kind.plural, EventType::Modified, &item);
        state.objects.insert(object_key, item.clone());
        Ok(item)
    }

    /// Current snapshot of an object.
    pub fn object(&self, kind: &ResourceKind, id: &NamespacedName) -> Option<RawItem> {
        self.state()
            .objects
            .get(&key(kind, &id.namespace, &id.name))
            .cloned()
    }

    /// Queue a fault for the next update of `id`; faults fire in order.
    pub fn inject_update_fault(&self, kind: &ResourceKind, id: &NamespacedName, fault: Fault) {
        self.state()
            .faults
            .entry(key(kind, &id.namespace, &id.name))
            .or_default()
            .push_back(fault);
    }

    /// Number of update calls received for `id`, failed ones included.
    pub fn update_calls(&self, kind: &ResourceKind, id: &NamespacedName) -> usize {
        self.state()
            .update_calls
            .get(&key(kind, &id.namespace, &id.name))
            .copied()
            .unwrap_or(0)
    }

    /// Number of update calls received across all objects.
    pub fn total_update_calls(&self) -> usize {
        self.state().update_calls.values().sum()
    }

    /// Close every open watch, as a server-side timeout would.
    pub fn close_watches(&self) {
        self.state().watchers.clear();
    }
}

impl ResourceStore for MemoryBackend {
    fn resolve_class(&self, name: &str) -> Result<ResourceKind> {
        self.state()
            .classes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))
    }

    fn list(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Vec<RawItem>> {
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|((plural, ns, _), _)| {
                plural == &kind.plural && namespace.is_none_or(|wanted| wanted == ns)
            })
            .map(|(_, item)| item.clone())
            .collect())
    }

    fn get(&self, kind: &ResourceKind, id: &NamespacedName) -> Result<RawItem> {
        self.object(kind, id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn update(&self, kind: &ResourceKind, item: &RawItem) -> Result<RawItem> {
        let mut state = self.state();
        let id = item.namespaced_name();
        let object_key = key(kind, &id.namespace, &id.name);
        *state.update_calls.entry(object_key.clone()).or_default() += 1;

        let fault = state
            .faults
            .get_mut(&object_key)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Conflict) => {
                if let Some(mut stored) = state.objects.get(&object_key).cloned() {
                    let version = state.next_version();
                    stored.set_resource_version(version);
                    state.record(&kind.plural, EventType::Modified, &stored);
                    state.objects.insert(object_key, stored);
                }
                return Err(Error::Conflict(id.to_string()));
            }
            Some(Fault::Network) => {
                return Err(Error::network("connection reset by peer", None));
            }
            Some(Fault::Validation) => {
                return Err(Error::Validation(format!("{id}: rejected")));
            }
            None => {}
        }

        let stored = state
            .objects
            .get(&object_key)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if let Some(expected) = item.resource_version() {
            if stored.resource_version() != Some(expected) {
                return Err(Error::Conflict(id.to_string()));
            }
        }

        let mut updated = item.clone();
        let version = state.next_version();
        updated.set_resource_version(version);
        state.record(&kind.plural, EventType::Modified, &updated);
        state.objects.insert(object_key, updated.clone());
        Ok(updated)
    }

    fn create(&self, kind: &ResourceKind, item: &RawItem, options: &CreateOptions) -> Result<RawItem> {
        let mut state = self.state();
        let mut created = item.clone();

        if created.name().is_empty() {
            let prefix = created
                .generate_name()
                .ok_or_else(|| Error::Validation("name or generateName is required".to_string()))?
                .to_string();
            state.generated += 1;
            let name = format!("{prefix}{:05x}", state.generated);
            created.set_metadata_field("name", Value::String(name));
        }

        let object_key = key(kind, created.namespace(), created.name());
        if state.objects.contains_key(&object_key) {
            return Err(Error::Conflict(created.namespaced_name().to_string()));
        }
        if options.dry_run {
            return Ok(created);
        }

        let version = state.next_version();
        created.set_resource_version(version);
        state.record(&kind.plural, EventType::Added, &created);
        state.objects.insert(object_key, created.clone());
        Ok(created)
    }

    fn watch(&self, kind: &ResourceKind, params: &WatchParams) -> Result<EventStream> {
        let mut state = self.state();
        let from: u64 = params
            .resource_version
            .as_deref()
            .map(str::parse::<u64>)
            .transpose()
            .map_err(|_| Error::Validation("resourceVersion must be numeric".to_string()))?
            .unwrap_or(state.version);

        let (tx, rx) = mpsc::channel();
        for (plural, version, event) in &state.history {
            if *version > from && plural == &kind.plural && params.matches(&event.object) {
                let _ = tx.send(event.clone());
            }
        }

        state.watchers.push(Watcher {
            plural: kind.plural.clone(),
            params: params.clone(),
            tx,
        });
        Ok(rx)
    }
}
