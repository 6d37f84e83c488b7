//! Backfill requests.
//!
//! A backfill is requested by creating a one-shot `BackfillRequest` object;
//! the stream operator picks it up, runs the backfill and flips
//! `spec.completed`. The caller may return right after creation or follow
//! the object's change stream until completion.

use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use kubestore::{
    CreateOptions, EventStream, EventType, FieldValidation, RawItem, ResourceKind, StoreProvider,
    WatchParams,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Field manager recorded on created requests.
pub const FIELD_MANAGER: &str = "kubectl-arcane";

/// Longest single wait on the change stream between cancellation checks.
const RECV_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackfillSpec {
    stream_class: String,
    stream_id: String,
    #[serde(default)]
    completed: bool,
}

/// A request to backfill one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    /// Server-assigned name; empty until created.
    pub name: String,
    pub namespace: String,
    pub stream_class: String,
    pub stream_id: String,
    pub completed: bool,
    pub resource_version: Option<String>,
}

impl BackfillRequest {
    /// A new, not yet created request for stream `stream_id`.
    pub fn new(
        namespace: impl Into<String>,
        stream_class: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            name: String::new(),
            namespace: namespace.into(),
            stream_class: stream_class.into(),
            stream_id: stream_id.into(),
            completed: false,
            resource_version: None,
        }
    }

    /// Name prefix the server completes with a random suffix.
    pub fn generate_name(&self) -> String {
        format!("{}-manual-", self.stream_id)
    }

    pub fn to_raw(&self) -> RawItem {
        let kind = ResourceKind::backfill_request();
        let mut metadata = json!({
            "generateName": self.generate_name(),
            "namespace": self.namespace,
        });
        if !self.name.is_empty() {
            metadata["name"] = json!(self.name);
        }
        let spec = BackfillSpec {
            stream_class: self.stream_class.clone(),
            stream_id: self.stream_id.clone(),
            completed: self.completed,
        };

        RawItem::new(json!({
            "apiVersion": kind.api_version(),
            "kind": kind.kind,
            "metadata": metadata,
            "spec": spec,
        }))
    }

    pub fn from_raw(raw: &RawItem) -> Result<Self> {
        let object = raw.namespaced_name().to_string();
        let spec = raw
            .value()
            .get("spec")
            .cloned()
            .ok_or_else(|| Error::parse(&object, "spec is missing"))?;
        let spec: BackfillSpec =
            serde_json::from_value(spec).map_err(|e| Error::parse(&object, e.to_string()))?;

        Ok(Self {
            name: raw.name().to_string(),
            namespace: raw.namespace().to_string(),
            stream_class: spec.stream_class,
            stream_id: spec.stream_id,
            completed: spec.completed,
            resource_version: raw.resource_version().map(str::to_string),
        })
    }
}

/// How a backfill is submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillOptions {
    /// Block until the request completes.
    pub wait: bool,
    /// Validate on the server without persisting.
    pub dry_run: bool,
}

/// Creates backfill requests and follows them to completion.
pub struct BackfillWatcher<'a> {
    provider: &'a dyn StoreProvider,
}

impl<'a> BackfillWatcher<'a> {
    pub fn new(provider: &'a dyn StoreProvider) -> Self {
        Self { provider }
    }

    /// Create `request` and, if asked to, wait for it to complete.
    ///
    /// The request is left in place whatever the outcome.
    pub fn run(
        &self,
        request: &BackfillRequest,
        options: BackfillOptions,
        cancel: &CancelToken,
    ) -> Result<BackfillRequest> {
        cancel.check()?;
        let store = self.provider.store()?;
        let kind = ResourceKind::backfill_request();

        let create = CreateOptions {
            dry_run: options.dry_run,
            field_manager: Some(FIELD_MANAGER.to_string()),
            field_validation: FieldValidation::Strict,
        };
        let created = store.create(&kind, &request.to_raw(), &create)?;
        let submitted = BackfillRequest::from_raw(&created)?;
        log::info!(
            "backfill request {}/{} created",
            submitted.namespace,
            submitted.name
        );

        if !options.wait || submitted.completed {
            return Ok(submitted);
        }
        if options.dry_run {
            log::warn!("dry run: nothing was persisted, not waiting for completion");
            return Ok(submitted);
        }

        let events = store.watch(&kind, &WatchParams::for_object(&created))?;
        Self::await_completion(&events, cancel)
    }

    fn await_completion(events: &EventStream, cancel: &CancelToken) -> Result<BackfillRequest> {
        loop {
            cancel.check()?;
            let slice = cancel
                .remaining()
                .map_or(RECV_SLICE, |remaining| remaining.min(RECV_SLICE));

            let event = match events.recv_timeout(slice) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::WatchClosed),
            };

            match event.event_type {
                EventType::Added | EventType::Modified => {
                    let request = BackfillRequest::from_raw(&event.object)?;
                    if request.completed {
                        return Ok(request);
                    }
                    log::debug!("backfill {} still running", request.name);
                }
                EventType::Deleted => {
                    let name = event.object.namespaced_name().to_string();
                    return Err(kubestore::Error::NotFound(name).into());
                }
                EventType::Error => {
                    return Err(kubestore::Error::Watch(event.error_message()).into());
                }
                EventType::Bookmark => {}
            }
        }
    }
}
