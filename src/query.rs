//! Consumer-facing query handles.
//!
//! A [`QueryHandle`] binds a resolver, a [`QueryKey`] and a [`QueryConfig`]
//! to whichever [`CacheEntry`] the key currently resolves to. Several handles
//! whose keys evaluate to the same identity share one entry, and so one
//! fetch.
//!
//! # Key changes
//!
//! Keys with dynamic parts can change identity without being re-issued. The
//! handle cannot see that on its own: the application calls
//! [`QueryHandle::notify_key_may_have_changed`] whenever state read by the
//! key's accessors may have changed. When the identity did change, the handle
//! moves its subscription to the new entry and forces a fresh fetch there.
//!
//! # Example
//!
//! ```rust,no_run
//! use tears_query::prelude::*;
//!
//! # async fn demo() -> Result<(), StoreError> {
//! let client = QueryClient::new();
//! let user = client.create_query(query_key!["user", 1], |input| async move {
//!     Ok::<_, QueryError>(format!("profile for {}", input.identity))
//! })?;
//!
//! let settled = user.settled().await;
//! assert_eq!(settled.data.as_deref(), Some("profile for user:1"));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::config::QueryConfig;
use crate::entry::{AnyEntry, CacheEntry, QuerySnapshot, QueryStatus, Resolver, Subscription};
use crate::error::{QueryError, StoreError};
use crate::key::{KeyIdentity, QueryKey, resolve_key};
use crate::store::QueryCacheStore;

struct Binding<T, E> {
    entry: Arc<CacheEntry<T, E>>,
    subscription: Option<Subscription>,
}

struct Inner<T, E> {
    store: QueryCacheStore,
    key: QueryKey,
    resolver: Resolver<T, E>,
    config: QueryConfig,
    binding: Mutex<Binding<T, E>>,
    has_mounted: AtomicBool,
    tx: Arc<watch::Sender<QuerySnapshot<T, E>>>,
}

/// A live query bound to the cache entry of its current key.
///
/// Cloning is cheap and yields another handle to the same query. The query
/// unsubscribes from its entry when the last clone is dropped; the entry itself
/// stays in the store.
pub struct QueryHandle<T, E = QueryError> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for QueryHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> QueryHandle<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a query against `store`.
    ///
    /// Evaluates the key, binds to its entry and, if `config.enabled`, starts
    /// the entry's initial fetch unless the entry has already fetched. The
    /// initial fetch is started before this returns and finished on a spawned
    /// task, so this must be called within a tokio runtime when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the key's identity already holds
    /// an entry of another type.
    pub fn new(
        store: QueryCacheStore,
        key: QueryKey,
        resolver: Resolver<T, E>,
        config: QueryConfig,
    ) -> Result<Self, StoreError> {
        let (values, identity) = resolve_key(&key);
        let entry = store.get_or_create(&identity, values, &resolver)?;

        let (tx, _rx) = watch::channel(entry.snapshot());
        let tx = Arc::new(tx);
        let subscription = Self::bind(&entry, &tx);

        let handle = Self {
            inner: Arc::new(Inner {
                store,
                key,
                resolver,
                config,
                binding: Mutex::new(Binding {
                    entry: Arc::clone(&entry),
                    subscription: Some(subscription),
                }),
                has_mounted: AtomicBool::new(false),
                tx,
            }),
        };

        if config.enabled {
            entry.spawn_refetch_mount();
        }

        // The first pass only establishes the key; it never refetches.
        handle.notify_key_may_have_changed()?;
        Ok(handle)
    }

    /// Re-evaluates the key and follows it to a new entry if its identity
    /// changed.
    ///
    /// Returns `true` if the handle moved. Moving always forces a fetch on the
    /// new entry, even if that entry already holds data. The first call, made
    /// during construction, never moves.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the new identity holds an entry
    /// of another type; the handle then stays on its current entry.
    pub fn notify_key_may_have_changed(&self) -> Result<bool, StoreError> {
        let (values, identity) = resolve_key(&self.inner.key);

        if !self.inner.has_mounted.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let entry = {
            let mut binding = self.inner.binding.lock();
            if binding.entry.identity() == &identity {
                return Ok(false);
            }

            let entry = self
                .inner
                .store
                .get_or_create(&identity, values, &self.inner.resolver)?;
            debug!(
                from = %binding.entry.identity(),
                to = %identity,
                "query key changed"
            );

            if let Some(previous) = binding.subscription.take() {
                previous.unsubscribe();
            }
            binding.entry = Arc::clone(&entry);
            binding.subscription = Some(Self::bind(&entry, &self.inner.tx));
            entry
        };

        entry.spawn_refetch();
        Ok(true)
    }

    /// Refetches the currently bound entry.
    pub async fn refetch(&self) {
        let entry = self.entry();
        entry.refetch().await;
    }

    /// Waits until the bound entry has settled and returns its state.
    ///
    /// A fetch whose resolver panicked counts as settled. Waits forever on a
    /// query that is never fetched.
    pub async fn settled(&self) -> QuerySnapshot<T, E> {
        let mut rx = self.watch();
        let settled = match rx.wait_for(QuerySnapshot::is_settled).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.snapshot())
    }

    /// A receiver that always holds the bound entry's latest state.
    ///
    /// It is re-seeded whenever the handle moves to another entry.
    pub fn watch(&self) -> watch::Receiver<QuerySnapshot<T, E>> {
        self.inner.tx.subscribe()
    }

    pub fn snapshot(&self) -> QuerySnapshot<T, E> {
        self.entry().snapshot()
    }

    pub fn data(&self) -> Option<T> {
        self.entry().data()
    }

    pub fn error(&self) -> Option<E> {
        self.entry().error()
    }

    pub fn is_loading(&self) -> bool {
        self.entry().is_loading()
    }

    pub fn status(&self) -> QueryStatus {
        self.entry().status()
    }

    /// Identity of the currently bound entry.
    pub fn identity(&self) -> KeyIdentity {
        self.entry().identity().clone()
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    pub fn config(&self) -> QueryConfig {
        self.inner.config
    }

    /// The currently bound entry.
    pub fn entry(&self) -> Arc<CacheEntry<T, E>> {
        Arc::clone(&self.inner.binding.lock().entry)
    }

    /// Subscribes the watch channel to `entry` and seeds it with the entry's
    /// current state, since entries don't replay state to new subscribers.
    fn bind(
        entry: &Arc<CacheEntry<T, E>>,
        tx: &Arc<watch::Sender<QuerySnapshot<T, E>>>,
    ) -> Subscription {
        let sender = Arc::clone(tx);
        let source: Weak<CacheEntry<T, E>> = Arc::downgrade(entry);
        let subscription = entry.subscribe(move |_| {
            sender.send_if_modified(|current| match source.upgrade() {
                // Late deliveries from an entry we already left are ignored.
                Some(entry) if current.identity == *entry.identity() => {
                    *current = entry.snapshot();
                    true
                }
                _ => false,
            });
        });
        tx.send_modify(|current| *current = entry.snapshot());
        subscription
    }

    pub(crate) fn tracked(&self) -> Weak<dyn TrackedQuery> {
        let inner: Arc<dyn TrackedQuery> = self.inner.clone();
        Arc::downgrade(&inner)
    }
}

impl<T, E> fmt::Debug for QueryHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.inner.binding.lock();
        f.debug_struct("QueryHandle")
            .field("key", &self.inner.key)
            .field("entry", &binding.entry)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// What the client needs from a query to route host events to it.
pub(crate) trait TrackedQuery: Send + Sync {
    fn config(&self) -> QueryConfig;

    fn bound_entry(&self) -> Arc<dyn AnyEntry>;
}

impl<T, E> TrackedQuery for Inner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn config(&self) -> QueryConfig {
        self.config
    }

    fn bound_entry(&self) -> Arc<dyn AnyEntry> {
        self.binding.lock().entry.clone()
    }
}
