//! The entry point for creating queries and mutations.
//!
//! A [`QueryClient`] owns one [`QueryCacheStore`] and remembers the queries it
//! created, so it can:
//! - route invalidations to the matching cache entry
//! - refetch opted-in queries when the host regains focus or navigates
//!
//! # Example
//!
//! ```rust,no_run
//! use tears_query::prelude::*;
//!
//! # async fn demo() -> Result<(), StoreError> {
//! let client = QueryClient::new();
//! let todos = client.create_query(query_key!["todos"], |_| async {
//!     Ok::<_, QueryError>(vec!["write docs".to_string()])
//! })?;
//!
//! // Somewhere else, after the todo list changed on the server:
//! client.invalidate(&query_key!["todos"]).await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::QueryConfig;
use crate::entry::{AnyEntry, ResolverInput, resolver};
use crate::error::StoreError;
use crate::host::{HostEvent, HostEvents, ListenerHandle};
use crate::key::{QueryKey, hash_key};
use crate::mutation::{MutationHandle, MutationOptions};
use crate::query::{QueryHandle, TrackedQuery};
use crate::store::QueryCacheStore;

/// A client for managing the query cache, invalidation and host triggers.
///
/// Cloning is cheap; clones share the store and the query registry.
#[derive(Clone)]
pub struct QueryClient {
    store: QueryCacheStore,
    queries: Arc<Mutex<Vec<Weak<dyn TrackedQuery>>>>,
    config: QueryConfig,
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new query client whose queries default to `config`.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        Self::with_store(QueryCacheStore::new(), config)
    }

    /// Creates a client on top of an existing store.
    #[must_use]
    pub fn with_store(store: QueryCacheStore, config: QueryConfig) -> Self {
        Self {
            store,
            queries: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    pub const fn store(&self) -> &QueryCacheStore {
        &self.store
    }

    /// The configuration used by [`create_query`](Self::create_query).
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Creates a query with the client's default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the key's identity already holds
    /// an entry of another type.
    pub fn create_query<T, E, F, Fut>(
        &self,
        key: QueryKey,
        fetch: F,
    ) -> Result<QueryHandle<T, E>, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: Fn(ResolverInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.create_query_with_config(key, fetch, self.config)
    }

    /// Creates a query with its own configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the key's identity already holds
    /// an entry of another type.
    pub fn create_query_with_config<T, E, F, Fut>(
        &self,
        key: QueryKey,
        fetch: F,
        config: QueryConfig,
    ) -> Result<QueryHandle<T, E>, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: Fn(ResolverInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let handle = QueryHandle::new(self.store.clone(), key, resolver(fetch), config)?;
        {
            let mut queries = self.queries.lock();
            queries.retain(|query| query.strong_count() > 0);
            queries.push(handle.tracked());
        }
        Ok(handle)
    }

    /// Creates a mutation. Mutations are not cached and not tracked.
    pub fn create_mutation<I, O, E>(
        &self,
        options: MutationOptions<I, O, E>,
    ) -> MutationHandle<I, O, E>
    where
        I: Send + 'static,
        O: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        MutationHandle::new(options)
    }

    /// Refetches the entry for `key`, if one exists.
    ///
    /// Completes when the refetch settles or is superseded. Returns whether an
    /// entry was found; invalidating a key nobody has queried is a no-op.
    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        let identity = hash_key(key);
        match self.store.lookup(&identity) {
            Some(entry) => {
                debug!(identity = %identity, "invalidating query");
                entry.refetch_boxed().await;
                true
            }
            None => {
                debug!(identity = %identity, "nothing to invalidate");
                false
            }
        }
    }

    /// Refetches every live, enabled query that opted into `event`'s trigger.
    ///
    /// Each entry is refetched once even when several queries share it.
    /// Returns the number of entries refetched.
    pub async fn handle_host_event(&self, event: HostEvent) -> usize {
        let entries = self.entries_for(event);
        if !entries.is_empty() {
            debug!(?event, entries = entries.len(), "refetching on host event");
        }
        let count = entries.len();
        join_all(entries.into_iter().map(|entry| entry.refetch_boxed())).await;
        count
    }

    /// Spawns a task applying every event from `events` until cancelled.
    ///
    /// Must be called within a tokio runtime.
    pub fn listen(&self, events: &HostEvents) -> ListenerHandle {
        let token = CancellationToken::new();
        let mut stream = events.stream();
        let client = self.clone();
        let cancelled = token.clone();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    event = stream.next() => match event {
                        Some(event) => {
                            let client = client.clone();
                            tokio::spawn(async move {
                                client.handle_host_event(event).await;
                            });
                        }
                        None => break,
                    },
                }
            }
            debug!("host event listener stopped");
        });

        ListenerHandle::new(token, join)
    }

    /// Number of queries created by this client that are still alive.
    pub fn query_count(&self) -> usize {
        let mut queries = self.queries.lock();
        queries.retain(|query| query.strong_count() > 0);
        queries.len()
    }

    fn entries_for(&self, event: HostEvent) -> Vec<Arc<dyn AnyEntry>> {
        let wants: fn(&QueryConfig) -> bool = match event {
            HostEvent::Visible => |config| config.refetch_on_window_focus,
            HostEvent::Navigated => |config| config.refetch_on_navigate,
            HostEvent::Hidden => return Vec::new(),
        };

        let live: Vec<Arc<dyn TrackedQuery>> = {
            let mut queries = self.queries.lock();
            queries.retain(|query| query.strong_count() > 0);
            queries.iter().filter_map(Weak::upgrade).collect()
        };

        let mut seen = HashSet::new();
        live.into_iter()
            .filter(|query| {
                let config = query.config();
                config.enabled && wants(&config)
            })
            .map(|query| query.bound_entry())
            .filter(|entry| seen.insert(entry.identity().clone()))
            .collect()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("store", &self.store)
            .field("queries", &self.queries.lock().len())
            .field("config", &self.config)
            .finish()
    }
}
