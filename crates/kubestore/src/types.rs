//! Common types shared by all store backends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// API group of the Arcane streaming resources.
pub const STREAMING_GROUP: &str = "streaming.sneaksanddata.com";

/// API version of the Arcane streaming resources.
pub const STREAMING_VERSION: &str = "v1";

/// A concrete resource type (group, version, kind) plus its REST plural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceKind {
    /// Create a kind, deriving the plural from the kind name.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        let plural = format!("{}s", kind.to_lowercase());
        Self {
            group: group.into(),
            version: version.into(),
            kind,
            plural,
        }
    }

    /// Override the REST plural.
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// The cluster-scoped `StreamClass` indirection resource.
    pub fn stream_class() -> Self {
        Self::new(STREAMING_GROUP, STREAMING_VERSION, "StreamClass").with_plural("streamclasses")
    }

    /// The namespaced `BackfillRequest` job resource.
    pub fn backfill_request() -> Self {
        Self::new(STREAMING_GROUP, STREAMING_VERSION, "BackfillRequest")
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Lowercase `kind.group`, the prefix used when printing object names.
    pub fn group_kind(&self) -> String {
        format!("{}.{}", self.kind.to_lowercase(), self.group)
    }

    /// Read the target kind out of a `StreamClass` object.
    ///
    /// The class spec names the governed resource through `apiGroupRef`,
    /// `apiVersion`, `kindRef` and an optional `pluralName`.
    pub fn from_stream_class(class: &RawItem) -> Result<Self> {
        let spec = class
            .value()
            .get("spec")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::InvalidResponse(format!("stream class {} has no spec", class.name())))?;

        let field = |key: &str| -> Result<String> {
            spec.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::InvalidResponse(format!("stream class {} is missing spec.{key}", class.name()))
                })
        };

        let mut kind = Self::new(field("apiGroupRef")?, field("apiVersion")?, field("kindRef")?);
        if let Some(plural) = spec.get("pluralName").and_then(Value::as_str) {
            if !plural.is_empty() {
                kind.plural = plural.to_string();
            }
        }
        Ok(kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.plural, self.group, self.version)
    }
}

/// Namespace plus name of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An untyped object as returned by the API server.
///
/// Holds the full JSON payload so fields this crate does not understand
/// survive a read-modify-write cycle untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawItem(Value);

impl RawItem {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get(key)?.as_str()
    }

    /// `metadata.name`, empty if absent.
    pub fn name(&self) -> &str {
        self.metadata_str("name").unwrap_or_default()
    }

    /// `metadata.namespace`, empty for cluster-scoped objects.
    pub fn namespace(&self) -> &str {
        self.metadata_str("namespace").unwrap_or_default()
    }

    /// `metadata.generateName`, if set.
    pub fn generate_name(&self) -> Option<&str> {
        self.metadata_str("generateName")
    }

    /// The optimistic-concurrency version token.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata_str("resourceVersion")
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace(), self.name())
    }

    /// Set `metadata.<key>`, creating `metadata` when missing.
    pub fn set_metadata_field(&mut self, key: &str, value: Value) {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        if let Value::Object(root) = &mut self.0 {
            let metadata = root
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if !metadata.is_object() {
                *metadata = Value::Object(Map::new());
            }
            if let Value::Object(metadata) = metadata {
                metadata.insert(key.to_string(), value);
            }
        }
    }

    pub fn set_resource_version(&mut self, version: impl Into<String>) {
        self.set_metadata_field("resourceVersion", Value::String(version.into()));
    }
}

impl From<Value> for RawItem {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Type of a change event on a watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// One change event; `object` is the snapshot after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: RawItem,
}

impl WatchEvent {
    /// Message carried by an `ERROR` event (a `Status` object).
    pub fn error_message(&self) -> String {
        self.object
            .value()
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown watch error")
            .to_string()
    }
}

/// Receiving end of a watch; the channel closes when the stream ends.
pub type EventStream = std::sync::mpsc::Receiver<WatchEvent>;

/// Server-side field validation mode for create calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldValidation {
    Ignore,
    Warn,
    #[default]
    Strict,
}

impl FieldValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "Ignore",
            Self::Warn => "Warn",
            Self::Strict => "Strict",
        }
    }
}

/// Options for creating an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Validate and admit the object without persisting it.
    pub dry_run: bool,
    /// Field manager recorded in managed fields.
    pub field_manager: Option<String>,
    pub field_validation: FieldValidation,
}

/// Scope of a watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchParams {
    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Restrict events to one object via `metadata.name`.
    pub name: Option<String>,
    /// Deliver changes after this resource version.
    pub resource_version: Option<String>,
}

impl WatchParams {
    /// Watch a single named object starting after `resource_version`.
    pub fn for_object(item: &RawItem) -> Self {
        Self {
            namespace: Some(item.namespace().to_string()).filter(|ns| !ns.is_empty()),
            name: Some(item.name().to_string()),
            resource_version: item.resource_version().map(str::to_string),
        }
    }

    /// Whether `item` falls inside this watch's scope.
    pub fn matches(&self, item: &RawItem) -> bool {
        self.namespace.as_deref().is_none_or(|ns| ns == item.namespace())
            && self.name.as_deref().is_none_or(|name| name == item.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_kind_from_stream_class() {
        let class = RawItem::new(json!({
            "metadata": {"name": "arcane-stream-mock"},
            "spec": {
                "apiGroupRef": "streaming.sneaksanddata.com",
                "apiVersion": "v1",
                "kindRef": "TestStreamDefinition",
                "pluralName": "teststreamdefinitions"
            }
        }));

        let kind = ResourceKind::from_stream_class(&class).unwrap();
        assert_eq!(kind.kind, "TestStreamDefinition");
        assert_eq!(kind.plural, "teststreamdefinitions");
        assert_eq!(kind.api_version(), "streaming.sneaksanddata.com/v1");
        assert_eq!(kind.group_kind(), "teststreamdefinition.streaming.sneaksanddata.com");
    }

    #[test]
    fn test_resource_kind_derives_plural() {
        let class = RawItem::new(json!({
            "metadata": {"name": "sql-server"},
            "spec": {"apiGroupRef": "streaming.example.com", "apiVersion": "v1beta1", "kindRef": "SqlStream"}
        }));

        let kind = ResourceKind::from_stream_class(&class).unwrap();
        assert_eq!(kind.plural, "sqlstreams");
    }

    #[test]
    fn test_resource_kind_missing_field() {
        let class = RawItem::new(json!({
            "metadata": {"name": "broken"},
            "spec": {"apiGroupRef": "streaming.example.com"}
        }));

        let err = ResourceKind::from_stream_class(&class).unwrap_err();
        assert!(err.to_string().contains("apiVersion"));
    }

    #[test]
    fn test_raw_item_accessors() {
        let mut item = RawItem::new(json!({
            "metadata": {
                "name": "abc-1",
                "namespace": "streams",
                "resourceVersion": "7"
            }
        }));

        assert_eq!(item.namespaced_name().to_string(), "streams/abc-1");
        assert_eq!(item.resource_version(), Some("7"));

        item.set_resource_version("8");
        assert_eq!(item.resource_version(), Some("8"));
    }

    #[test]
    fn test_watch_event_decodes_wire_format() {
        let event: WatchEvent = serde_json::from_str(
            r#"{"type":"MODIFIED","object":{"metadata":{"name":"bf-1","namespace":"default"}}}"#,
        )
        .unwrap();

        assert_eq!(event.event_type, EventType::Modified);
        assert_eq!(event.object.name(), "bf-1");
    }

    #[test]
    fn test_watch_params_scope() {
        let item = RawItem::new(json!({"metadata": {"name": "bf-1", "namespace": "default"}}));
        let params = WatchParams::for_object(&item);

        assert!(params.matches(&item));
        let other = RawItem::new(json!({"metadata": {"name": "bf-2", "namespace": "default"}}));
        assert!(!params.matches(&other));
    }
}
