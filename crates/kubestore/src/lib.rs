//! # kubestore
//!
//! Blocking access to Kubernetes custom resources, as consumed by the
//! `kubectl-arcane` stream engine.
//!
//! ## Operations
//!
//! - **resolve_class**: map a `StreamClass` name to the concrete resource kind
//! - **list / get**: read objects as untyped JSON ([`RawItem`])
//! - **update**: replace an object under optimistic concurrency
//! - **create**: create an object (dry-run and `generateName` aware)
//! - **watch**: receive change events over a channel
//!
//! ## Backends
//!
//! - [`backend::http::HttpBackend`]: REST calls against the API server
//! - [`backend::memory::MemoryBackend`]: in-process store with fault injection
//!
//! ## Example
//!
//! ```no_run
//! use kubestore::backend::http::{HttpBackend, DEFAULT_SERVER};
//! use kubestore::{NamespacedName, ResourceStore};
//!
//! let store = HttpBackend::new(DEFAULT_SERVER, None);
//! let kind = store.resolve_class("arcane-stream-mock").expect("class exists");
//! let item = store
//!     .get(&kind, &NamespacedName::new("default", "my-stream"))
//!     .expect("stream exists");
//! println!("{} is at version {:?}", item.name(), item.resource_version());
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Store backends and the [`ResourceStore`] trait.
pub mod backend;
/// Error types for store operations.
pub mod error;
/// Lazily constructed store handles.
pub mod provider;
/// Resource kinds, raw objects and watch events.
pub mod types;

pub use backend::ResourceStore;
pub use error::{Error, ErrorCategory, Result};
pub use provider::{LazyStore, StoreHandle, StoreProvider};
pub use types::{
    CreateOptions, EventStream, EventType, FieldValidation, NamespacedName, RawItem, ResourceKind,
    WatchEvent, WatchParams, STREAMING_GROUP, STREAMING_VERSION,
};
