//! Typed view over stream resources.
//!
//! Every stream class governs its own resource kind with its own schema. The
//! engine only needs three things from it (the `spec.suspended` flag, the
//! `status.phase`, and the labels), so [`StreamDefinition`] reads those and
//! carries the raw payload along untouched.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use kubestore::{NamespacedName, RawItem};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Label marking a stream as held by a downtime window.
pub const DOWNTIME_LABEL: &str = "arcane.sneaksanddata.com/downtime";

/// Lifecycle phase reported by the stream operator.
///
/// Operators may grow new phases; those land in [`Phase::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Pending,
    Running,
    Suspended,
    Backfilling,
    Failed,
    Other(String),
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Suspended => "Suspended",
            Self::Backfilling => "Backfilling",
            Self::Failed => "Failed",
            Self::Other(phase) => phase,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Phase {
    fn from(s: &str) -> Self {
        match s {
            "" | "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Suspended" => Self::Suspended,
            "Backfilling" => Self::Backfilling,
            "Failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl FromStr for Phase {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// Adapted view of one stream resource.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDefinition {
    raw: RawItem,
    id: NamespacedName,
    labels: BTreeMap<String, String>,
    suspended: bool,
    phase: Phase,
    // Values as read, so `to_raw` only writes what changed.
    adapted_labels: BTreeMap<String, String>,
    adapted_suspended: bool,
}

impl StreamDefinition {
    /// Adapt a raw object.
    ///
    /// Fails if `metadata.name` is missing, `spec` is not an object,
    /// `spec.suspended` is not a bool, a label value is not a string, or
    /// `status.phase` is not a string.
    pub fn adapt(raw: RawItem) -> Result<Self> {
        let id = raw.namespaced_name();
        if id.name.is_empty() {
            return Err(Error::parse("<unnamed object>", "metadata.name is missing"));
        }
        let object = id.to_string();
        let value = raw.value();

        let spec = value
            .get("spec")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::parse(&object, "spec is missing or not an object"))?;

        let suspended = match spec.get("suspended") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => return Err(Error::parse(&object, "spec.suspended is not a boolean")),
        };

        let labels: BTreeMap<String, String> =
            match value.get("metadata").and_then(|m| m.get("labels")) {
                None | Some(Value::Null) => BTreeMap::new(),
                Some(Value::Object(map)) => map
                    .iter()
                    .map(|(k, v)| match v {
                        Value::String(s) => Ok((k.clone(), s.clone())),
                        _ => Err(Error::parse(&object, format!("label {k} is not a string"))),
                    })
                    .collect::<Result<_>>()?,
                Some(_) => return Err(Error::parse(&object, "metadata.labels is not a map")),
            };

        let phase = match value.get("status").and_then(|s| s.get("phase")) {
            None | Some(Value::Null) => Phase::Pending,
            Some(Value::String(s)) => Phase::from(s.as_str()),
            Some(_) => return Err(Error::parse(&object, "status.phase is not a string")),
        };

        Ok(Self {
            raw,
            id,
            adapted_labels: labels.clone(),
            adapted_suspended: suspended,
            labels,
            suspended,
            phase,
        })
    }

    /// Write changed fields back over the original payload.
    ///
    /// Fields left as adapted keep their original encoding, so an untouched
    /// definition converts back to exactly the object it came from.
    pub fn to_raw(&self) -> RawItem {
        let mut raw = self.raw.clone();

        if self.labels != self.adapted_labels {
            let labels: Map<String, Value> = self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            raw.set_metadata_field("labels", Value::Object(labels));
        }

        if self.suspended != self.adapted_suspended
            && let Some(Value::Object(spec)) = raw.value_mut().get_mut("spec")
        {
            spec.insert("suspended".to_string(), Value::Bool(self.suspended));
        }
        raw
    }

    pub fn id(&self) -> &NamespacedName {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn namespace(&self) -> &str {
        &self.id.namespace
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.raw.resource_version()
    }

    pub fn suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    /// Phase as last reported by the operator; not changed by setters.
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        self.labels = labels;
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// The downtime key holding this stream, if any.
    pub fn downtime_key(&self) -> Option<&str> {
        self.label(DOWNTIME_LABEL)
    }

    /// Whether the persisted fields differ from `other`.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.suspended != other.suspended || self.labels != other.labels
    }
}
