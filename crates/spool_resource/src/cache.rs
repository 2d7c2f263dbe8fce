//! Resources shared between files.
//!
//! Some resources are referenced by an identifier rather than embedded, a texture used by many
//! models for instance. Whichever file is loaded first publishes it here, later files look it up.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Key of a shared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedKey {
    /// What kind of resource the identifier refers to
    pub kind: &'static str,
    /// Identifier, usually a hash of the resource name
    pub identifier: u64,
}

impl fmt::Display for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{:#x}", self.kind, self.identifier)
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Process wide table of shared resources
///
/// The first resource registered under a key is kept; later registrations get that one back.
#[derive(Default)]
pub struct SharedCache {
    entries: RwLock<IndexMap<SharedKey, Entry>>,
}

impl fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.read().keys().map(ToString::to_string))
            .finish()
    }
}

impl SharedCache {
    pub fn new() -> SharedCache {
        SharedCache::default()
    }

    /// Publish `resource` under `kind` and `identifier`
    ///
    /// Returns the resource stored for that key, which is `resource` only if nothing was
    /// registered before.
    pub fn register_shared<T>(
        &self,
        kind: &'static str,
        identifier: u64,
        resource: Arc<T>,
    ) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let key = SharedKey { kind, identifier };
        let mut entries = self.entries.write();

        let entry = match entries.get(&key) {
            Some(existing) => {
                debug!(%key, "shared resource already registered, keeping the first");
                existing.clone()
            }
            None => {
                trace!(%key, "registering shared resource");
                entries.insert(key, resource.clone());
                return Ok(resource);
            }
        };

        entry
            .downcast::<T>()
            .map_err(|_| Error::SharedTypeMismatch { kind, identifier })
    }

    /// The resource registered under `kind` and `identifier`
    ///
    /// Returns [`None`] when nothing was registered or the entry holds another type.
    pub fn find_shared<T>(&self, kind: &'static str, identifier: u64) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let entry = self
            .entries
            .read()
            .get(&SharedKey { kind, identifier })?
            .clone();
        entry.downcast::<T>().ok()
    }

    /// Like [`SharedCache::find_shared`], for references that must resolve
    pub fn require_shared<T>(&self, kind: &'static str, identifier: u64) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let entry = self
            .entries
            .read()
            .get(&SharedKey { kind, identifier })
            .cloned()
            .ok_or(Error::MissingSharedReference { kind, identifier })?;
        entry
            .downcast::<T>()
            .map_err(|_| Error::SharedTypeMismatch { kind, identifier })
    }

    pub fn contains(&self, kind: &'static str, identifier: u64) -> bool {
        self.entries
            .read()
            .contains_key(&SharedKey { kind, identifier })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget every shared resource
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Registered keys in registration order
    pub fn keys(&self) -> Vec<SharedKey> {
        self.entries.read().keys().copied().collect()
    }
}
