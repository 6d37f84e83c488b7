//! Lazily constructed store handles.
//!
//! Building a store may fail (bad server URL, unreadable token file), and
//! commands that never touch the cluster should not pay for it. A
//! [`LazyStore`] runs its initializer at most once; concurrent first callers
//! block on that single attempt and all of them observe its outcome,
//! including its error.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::backend::ResourceStore;
use crate::error::{Error, Result};

/// Shared handle to a store.
pub type StoreHandle = Arc<dyn ResourceStore>;

/// Source of store handles for the engine.
pub trait StoreProvider: Send + Sync {
    /// Obtain the store, constructing it on first use.
    fn store(&self) -> Result<StoreHandle>;
}

type Initializer = Box<dyn Fn() -> Result<StoreHandle> + Send + Sync>;

/// Initialize-once memoized store accessor.
pub struct LazyStore {
    init: Initializer,
    cell: OnceLock<std::result::Result<StoreHandle, Arc<Error>>>,
}

impl LazyStore {
    /// Create a provider that runs `init` on first use.
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Result<StoreHandle> + Send + Sync + 'static,
    {
        Self {
            init: Box::new(init),
            cell: OnceLock::new(),
        }
    }

    /// Whether initialization has already run.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for LazyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyStore")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl StoreProvider for LazyStore {
    fn store(&self) -> Result<StoreHandle> {
        let outcome = self.cell.get_or_init(|| {
            log::debug!("initializing resource store");
            (self.init)().map_err(Arc::new)
        });
        match outcome {
            Ok(store) => Ok(Arc::clone(store)),
            Err(cause) => Err(Error::Unavailable(Arc::clone(cause))),
        }
    }
}

impl<S: ResourceStore + 'static> StoreProvider for Arc<S> {
    fn store(&self) -> Result<StoreHandle> {
        Ok(Arc::clone(self) as StoreHandle)
    }
}
