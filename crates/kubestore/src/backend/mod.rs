use crate::error::Result;
use crate::types::{CreateOptions, EventStream, NamespacedName, RawItem, ResourceKind, WatchParams};

pub mod http;
pub mod memory;

/// Backend trait for resource store operations.
///
/// This trait abstracts the underlying implementation, allowing us to:
/// - Talk to a real API server over REST ([`http::HttpBackend`])
/// - Run against an in-process store ([`memory::MemoryBackend`])
/// - Mock for testing
///
/// Every method is a single blocking round trip; no results are cached.
pub trait ResourceStore: Send + Sync {
    /// Resolve a stream class name to the concrete kind it governs.
    ///
    /// Fails with [`crate::Error::ClassNotFound`] when the class does not exist.
    fn resolve_class(&self, name: &str) -> Result<ResourceKind>;

    /// List every object of `kind`, in one namespace or cluster-wide.
    ///
    /// Fails wholesale; partial results are never returned.
    fn list(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Vec<RawItem>>;

    /// Fetch one object. Fails with [`crate::Error::NotFound`].
    fn get(&self, kind: &ResourceKind, id: &NamespacedName) -> Result<RawItem>;

    /// Replace an object. Fails with [`crate::Error::Conflict`] when the
    /// item's resource version is stale.
    fn update(&self, kind: &ResourceKind, item: &RawItem) -> Result<RawItem>;

    /// Create an object, honoring `generateName`.
    fn create(&self, kind: &ResourceKind, item: &RawItem, options: &CreateOptions) -> Result<RawItem>;

    /// Open a change stream. Runs until the server closes it or the
    /// receiver is dropped.
    fn watch(&self, kind: &ResourceKind, params: &WatchParams) -> Result<EventStream>;
}
