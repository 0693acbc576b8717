//! The identity -> entry map backing one cache scope.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::entry::{AnyEntry, CacheEntry, Resolver};
use crate::error::StoreError;
use crate::key::{KeyIdentity, KeyValue};

/// Maps key identities to their [`CacheEntry`].
///
/// Entries are created on first lookup and kept for the lifetime of the
/// store; there is no eviction. One store is shared by every query in a scope
/// and passed explicitly to whoever needs it.
///
/// Entries are stored type-erased so queries of different data types can share
/// a store. Asking for an identity with a different `(T, E)` than it was
/// created with is a [`StoreError::TypeMismatch`].
#[derive(Default, Clone)]
pub struct QueryCacheStore {
    entries: Arc<DashMap<String, Arc<dyn AnyEntry>>>,
}

impl QueryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `identity`, creating it with `resolver` on a miss.
    ///
    /// On a hit the existing entry keeps the resolver it was created with.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the identity is bound to an entry
    /// of another data or error type.
    pub fn get_or_create<T, E>(
        &self,
        identity: &KeyIdentity,
        key: Vec<KeyValue>,
        resolver: &Resolver<T, E>,
    ) -> Result<Arc<CacheEntry<T, E>>, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let erased = match self.entries.entry(identity.as_str().to_owned()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                debug!(identity = %identity, "creating cache entry");
                let entry = Arc::new(CacheEntry::new(
                    identity.clone(),
                    key,
                    Arc::clone(resolver),
                ));
                vacant.insert(Arc::clone(&entry) as Arc<dyn AnyEntry>);
                return Ok(entry);
            }
        };

        let found = erased.type_name();
        erased
            .into_any()
            .downcast::<CacheEntry<T, E>>()
            .map_err(|_| StoreError::TypeMismatch {
                identity: identity.to_string(),
                found,
                requested: type_name::<CacheEntry<T, E>>(),
            })
    }

    /// Returns the entry for `identity` if one exists.
    pub fn lookup(&self, identity: &KeyIdentity) -> Option<Arc<dyn AnyEntry>> {
        self.entries
            .get(identity.as_str())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, identity: &KeyIdentity) -> bool {
        self.entries.contains_key(identity.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities of every entry, in no particular order.
    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl fmt::Debug for QueryCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCacheStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}
