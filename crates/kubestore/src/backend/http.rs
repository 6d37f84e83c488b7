//! Kubernetes REST backend.
//!
//! This module provides the [`HttpBackend`] implementation that talks to the
//! API server's custom resource endpoints with blocking HTTP calls.
//!
//! # Connecting
//!
//! The backend takes a server URL and an optional bearer token. The default
//! URL points at `kubectl proxy`, which handles authentication itself, so
//! no kubeconfig parsing happens here.

use std::io::{BufRead, BufReader};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use ureq::Body;
use ureq::http::Response;

use crate::backend::ResourceStore;
use crate::error::{Error, Result};
use crate::types::{
    CreateOptions, EventStream, NamespacedName, RawItem, ResourceKind, WatchEvent, WatchParams,
};

/// Default API endpoint: a local `kubectl proxy`.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8001";

/// Timeout for non-watch requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST backend for the Kubernetes API server.
pub struct HttpBackend {
    /// Agent for bounded request/response calls.
    agent: ureq::Agent,
    /// Agent without a global timeout, for long-lived watches.
    watch_agent: ureq::Agent,
    /// API server base URL, without trailing slash.
    server: String,
    /// Bearer token, if the server requires one.
    token: Option<String>,
}

impl HttpBackend {
    /// Create a backend for `server`.
    #[must_use]
    pub fn new(server: impl Into<String>, token: Option<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        let watch_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            watch_agent: ureq::Agent::new_with_config(watch_config),
            server: server.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the API server base URL.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// URL of a collection, namespaced or cluster-wide.
    fn collection_url(&self, kind: &ResourceKind, namespace: Option<&str>) -> String {
        let prefix = if kind.group.is_empty() {
            format!("{}/api/{}", self.server, kind.version)
        } else {
            format!("{}/apis/{}/{}", self.server, kind.group, kind.version)
        };

        match namespace {
            Some(ns) if !ns.is_empty() => format!("{prefix}/namespaces/{ns}/{}", kind.plural),
            _ => format!("{prefix}/{}", kind.plural),
        }
    }

    /// URL of a single object.
    fn object_url(&self, kind: &ResourceKind, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_url(kind, Some(namespace)), name)
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        let request = request
            .header("Accept", "application/json")
            .header("User-Agent", "kubectl-arcane");
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    /// Turn non-2xx responses into categorized errors about `target`.
    fn check(response: Response<Body>, target: &str) -> Result<Response<Body>> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(Error::from_status(status.as_u16(), target))
        }
    }

    fn read_item(mut response: Response<Body>) -> Result<RawItem> {
        let value: Value = response.body_mut().read_json()?;
        Ok(RawItem::new(value))
    }
}

impl ResourceStore for HttpBackend {
    fn resolve_class(&self, name: &str) -> Result<ResourceKind> {
        let class_kind = ResourceKind::stream_class();
        let url = format!("{}/{}", self.collection_url(&class_kind, None), name);
        log::debug!("GET {url}");

        let response = self.authorize(self.agent.get(&url)).call()?;
        let response = match Self::check(response, name) {
            Err(Error::NotFound(_)) => return Err(Error::ClassNotFound(name.to_string())),
            other => other?,
        };

        ResourceKind::from_stream_class(&Self::read_item(response)?)
    }

    fn list(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Vec<RawItem>> {
        let url = self.collection_url(kind, namespace);
        log::debug!("GET {url}");

        let response = self.authorize(self.agent.get(&url)).call()?;
        let mut response = Self::check(response, &kind.to_string())?;
        let list: Value = response.body_mut().read_json()?;

        let items = list
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::InvalidResponse(format!("{kind} list has no items")))?;

        // List items omit apiVersion/kind; restore them so updates round-trip.
        Ok(items
            .iter()
            .cloned()
            .map(|mut item| {
                if let Value::Object(fields) = &mut item {
                    fields
                        .entry("apiVersion")
                        .or_insert_with(|| Value::String(kind.api_version()));
                    fields
                        .entry("kind")
                        .or_insert_with(|| Value::String(kind.kind.clone()));
                }
                RawItem::new(item)
            })
            .collect())
    }

    fn get(&self, kind: &ResourceKind, id: &NamespacedName) -> Result<RawItem> {
        let url = self.object_url(kind, &id.namespace, &id.name);
        log::debug!("GET {url}");

        let response = self.authorize(self.agent.get(&url)).call()?;
        Self::read_item(Self::check(response, &id.to_string())?)
    }

    fn update(&self, kind: &ResourceKind, item: &RawItem) -> Result<RawItem> {
        let id = item.namespaced_name();
        let url = self.object_url(kind, &id.namespace, &id.name);
        log::debug!("PUT {url}");

        let response = self
            .authorize(self.agent.put(&url))
            .send_json(item.value())?;
        Self::read_item(Self::check(response, &id.to_string())?)
    }

    fn create(&self, kind: &ResourceKind, item: &RawItem, options: &CreateOptions) -> Result<RawItem> {
        let url = self.collection_url(kind, Some(item.namespace()));
        log::debug!("POST {url}");

        let mut request = self
            .authorize(self.agent.post(&url))
            .query("fieldValidation", options.field_validation.as_str());
        if options.dry_run {
            request = request.query("dryRun", "All");
        }
        if let Some(manager) = &options.field_manager {
            request = request.query("fieldManager", manager);
        }

        let target = item.generate_name().unwrap_or(item.name()).to_string();
        let response = request.send_json(item.value())?;
        Self::read_item(Self::check(response, &target)?)
    }

    fn watch(&self, kind: &ResourceKind, params: &WatchParams) -> Result<EventStream> {
        let url = self.collection_url(kind, params.namespace.as_deref());
        log::debug!("GET {url} (watch)");

        let mut request = self.authorize(self.watch_agent.get(&url)).query("watch", "true");
        if let Some(name) = &params.name {
            request = request.query("fieldSelector", format!("metadata.name={name}"));
        }
        if let Some(version) = &params.resource_version {
            request = request.query("resourceVersion", version);
        }

        let response = Self::check(request.call()?, &kind.to_string())?;
        let reader = BufReader::new(response.into_body().into_reader());
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("kubestore-watch".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            log::debug!("watch stream ended: {e}");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WatchEvent>(&line) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("undecodable watch event: {e}");
                            break;
                        }
                    }
                }
            })?;

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_kind() -> ResourceKind {
        ResourceKind::new("streaming.sneaksanddata.com", "v1", "TestStreamDefinition")
    }

    #[test]
    fn test_server_trailing_slash_trimmed() {
        let backend = HttpBackend::new("http://localhost:8001/", None);
        assert_eq!(backend.server(), "http://localhost:8001");
    }

    #[test]
    fn test_collection_url_namespaced() {
        let backend = HttpBackend::new(DEFAULT_SERVER, None);
        assert_eq!(
            backend.collection_url(&stream_kind(), Some("streams")),
            "http://127.0.0.1:8001/apis/streaming.sneaksanddata.com/v1/namespaces/streams/teststreamdefinitions"
        );
    }

    #[test]
    fn test_collection_url_cluster_wide() {
        let backend = HttpBackend::new(DEFAULT_SERVER, None);
        assert_eq!(
            backend.collection_url(&ResourceKind::stream_class(), None),
            "http://127.0.0.1:8001/apis/streaming.sneaksanddata.com/v1/streamclasses"
        );
        assert_eq!(
            backend.collection_url(&stream_kind(), Some("")),
            "http://127.0.0.1:8001/apis/streaming.sneaksanddata.com/v1/teststreamdefinitions"
        );
    }

    #[test]
    fn test_core_group_url() {
        let backend = HttpBackend::new(DEFAULT_SERVER, None);
        let kind = ResourceKind::new("", "v1", "ConfigMap");
        assert_eq!(
            backend.object_url(&kind, "default", "settings"),
            "http://127.0.0.1:8001/api/v1/namespaces/default/configmaps/settings"
        );
    }

    #[test]
    fn test_unreachable_server_is_network_error() {
        // Port 9 (discard) is closed on practically every machine.
        let backend = HttpBackend::new("http://127.0.0.1:9", None);
        let err = backend.resolve_class("anything").unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
