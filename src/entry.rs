//! Per-identity fetch state.
//!
//! A [`CacheEntry`] owns everything the cache knows about one
//! [`KeyIdentity`]: the last data, the last error, whether a fetch is in
//! flight, and who is listening. Only the entry's own fetch lifecycle writes
//! that state.
//!
//! # Lifecycle
//!
//! `Idle -> Loading -> {Success, Error} -> Loading -> ...`
//!
//! Starting a fetch cancels the previous one. A cancelled fetch never writes
//! to the entry, even if its resolver ignores the cancellation token and
//! settles anyway.
//!
//! # Subscribers
//!
//! Subscribers are called with a [`QuerySnapshot`] when a fetch starts and
//! when the winning fetch settles. A new subscriber is **not** replayed the
//! current state: whoever subscribes reads [`CacheEntry::snapshot`] itself
//! right after subscribing.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::key::{KeyIdentity, KeyValue};

/// What a resolver is handed for one fetch.
#[derive(Debug, Clone)]
pub struct ResolverInput {
    /// Identity of the entry being fetched.
    pub identity: KeyIdentity,
    /// The evaluated key the entry was created for.
    pub key: Vec<KeyValue>,
    /// Cancelled when a newer fetch supersedes this one.
    ///
    /// Observing it is optional; a superseded result is dropped either way.
    pub cancellation: CancellationToken,
}

/// An async function producing the data for a key.
pub type Resolver<T, E> =
    Arc<dyn Fn(ResolverInput) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Wraps an async closure as a [`Resolver`].
///
/// ```
/// use tears_query::entry::resolver;
/// use tears_query::error::QueryError;
///
/// let fetch_user = resolver(|input| async move {
///     Ok::<_, QueryError>(format!("user {}", input.identity))
/// });
/// ```
pub fn resolver<T, E, F, Fut>(f: F) -> Resolver<T, E>
where
    F: Fn(ResolverInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Arc::new(move |input| f(input).boxed())
}

type Listener<T, E> = Arc<dyn Fn(&QuerySnapshot<T, E>) + Send + Sync>;

/// The fetch status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Nothing has been fetched yet.
    #[default]
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed.
    Error,
}

/// A point-in-time copy of an entry's state.
///
/// `data` is kept while a refetch is loading; it is replaced when the fetch
/// succeeds and cleared when it fails.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T, E> {
    /// Identity of the entry this state belongs to.
    pub identity: KeyIdentity,
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<E>,
    /// Whether any fetch has finished, including one whose resolver panicked.
    pub has_settled: bool,
}

impl<T, E> QuerySnapshot<T, E> {
    /// An idle snapshot with no data and no error.
    #[must_use]
    pub const fn idle(identity: KeyIdentity) -> Self {
        Self {
            identity,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            has_settled: false,
        }
    }

    /// Returns the data if there is any.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Returns the error of the last fetch if it failed.
    pub const fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// Returns `true` if a fetch is in flight.
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, QueryStatus::Loading)
    }

    /// Returns `true` if the last fetch succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success)
    }

    /// Returns `true` if the last fetch failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }

    /// Returns `true` once a fetch has finished and no newer one is in flight.
    ///
    /// A panicked first fetch leaves the status `Idle` but still counts.
    pub const fn is_settled(&self) -> bool {
        self.has_settled && !self.is_loading()
    }

    /// The status implied by the stored data and error, for a fetch that
    /// produced neither.
    const fn fallback_status(&self) -> QueryStatus {
        if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }
}

struct EntryState<T, E> {
    snapshot: QuerySnapshot<T, E>,
    pending: Option<CancellationToken>,
    has_run_initial_fetch: bool,
    subscribers: HashMap<u64, Listener<T, E>>,
    next_subscriber: u64,
}

/// A fetch that has been started but not awaited yet.
struct PendingFetch<T, E> {
    token: CancellationToken,
    future: BoxFuture<'static, Result<T, E>>,
}

/// Outcome of starting a fetch.
enum Started<T, E> {
    /// Only the initial fetch was asked for, and it had already run.
    Skipped,
    /// The resolver panicked before returning its future.
    Aborted,
    Running(PendingFetch<T, E>),
}

/// Shared fetch state for one key identity.
pub struct CacheEntry<T, E> {
    identity: KeyIdentity,
    key: Vec<KeyValue>,
    resolver: Resolver<T, E>,
    state: Mutex<EntryState<T, E>>,
    // Serializes deliveries so subscribers observe transitions in order.
    delivery: ReentrantMutex<()>,
}

impl<T, E> CacheEntry<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an idle entry that fetches `key` with `resolver`.
    pub fn new(identity: KeyIdentity, key: Vec<KeyValue>, resolver: Resolver<T, E>) -> Self {
        Self {
            state: Mutex::new(EntryState {
                snapshot: QuerySnapshot::idle(identity.clone()),
                pending: None,
                has_run_initial_fetch: false,
                subscribers: HashMap::new(),
                next_subscriber: 0,
            }),
            identity,
            key,
            resolver,
            delivery: ReentrantMutex::new(()),
        }
    }

    pub const fn identity(&self) -> &KeyIdentity {
        &self.identity
    }

    /// The evaluated key this entry fetches.
    pub fn key(&self) -> &[KeyValue] {
        &self.key
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> QuerySnapshot<T, E> {
        self.state.lock().snapshot.clone()
    }

    pub fn status(&self) -> QueryStatus {
        self.state.lock().snapshot.status
    }

    pub fn data(&self) -> Option<T> {
        self.state.lock().snapshot.data.clone()
    }

    pub fn error(&self) -> Option<E> {
        self.state.lock().snapshot.error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.status() == QueryStatus::Loading
    }

    /// Returns `true` once any fetch has been started on this entry.
    pub fn has_run_initial_fetch(&self) -> bool {
        self.state.lock().has_run_initial_fetch
    }

    /// Returns `true` while a fetch is in flight.
    pub fn has_pending_fetch(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Runs the resolver, superseding any fetch already in flight.
    ///
    /// Completes when this fetch settles or is superseded. Resolver errors end
    /// up in the entry state; nothing is returned to the caller.
    pub async fn run(&self) {
        if let Started::Running(fetch) = self.start(false) {
            self.complete(fetch).await;
        }
    }

    /// Unconditionally refetches. Used for manual refetch, invalidation and
    /// host events.
    pub async fn refetch(&self) {
        self.run().await;
    }

    /// Fetches only if nothing has ever been fetched for this entry.
    ///
    /// Returns whether a fetch was run.
    pub async fn refetch_mount(&self) -> bool {
        match self.start(true) {
            Started::Skipped => false,
            Started::Aborted => true,
            Started::Running(fetch) => {
                self.complete(fetch).await;
                true
            }
        }
    }

    /// Starts a refetch now and finishes it on a spawned task.
    ///
    /// The entry is already `Loading` when this returns, unless the resolver
    /// panicked while being called.
    pub fn spawn_refetch(self: &Arc<Self>) -> JoinHandle<()> {
        let started = self.start(false);
        self.finish_on_task(started)
    }

    /// Like [`refetch_mount`](Self::refetch_mount), but finishes on a task.
    pub fn spawn_refetch_mount(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        match self.start(true) {
            Started::Skipped => None,
            started => Some(self.finish_on_task(started)),
        }
    }

    /// Registers a listener and returns the guard that removes it.
    ///
    /// The listener is not called with the current state.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&QuerySnapshot<T, E>) + Send + Sync + 'static,
    {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.insert(id, Arc::new(listener));
            id
        };

        let entry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(entry) = entry.upgrade() {
                entry.state.lock().subscribers.remove(&id);
            }
        })
    }

    fn finish_on_task(self: &Arc<Self>, started: Started<T, E>) -> JoinHandle<()> {
        let entry = Arc::clone(self);
        tokio::spawn(async move {
            if let Started::Running(fetch) = started {
                entry.complete(fetch).await;
            }
        })
    }

    /// Marks the entry `Loading`, supersedes the fetch in flight and calls the
    /// resolver.
    ///
    /// With `first_only`, the check and the claim of the initial fetch happen
    /// under one lock, so concurrent mounts start at most one fetch.
    fn start(&self, first_only: bool) -> Started<T, E> {
        let token = CancellationToken::new();
        {
            let mut state = self.state.lock();
            if first_only && state.has_run_initial_fetch {
                return Started::Skipped;
            }
            if let Some(previous) = state.pending.replace(token.clone()) {
                previous.cancel();
                debug!(identity = %self.identity, "superseding in-flight fetch");
            }
            state.has_run_initial_fetch = true;
            state.snapshot.status = QueryStatus::Loading;
        }
        debug!(identity = %self.identity, "fetch started");
        self.publish();

        let input = ResolverInput {
            identity: self.identity.clone(),
            key: self.key.clone(),
            // A resolver cancelling its own token must not wedge the entry.
            cancellation: token.child_token(),
        };
        match catch_unwind(AssertUnwindSafe(|| (self.resolver)(input))) {
            Ok(future) => Started::Running(PendingFetch { token, future }),
            Err(panic) => {
                error!(
                    identity = %self.identity,
                    panic = panic_message(panic.as_ref()),
                    "resolver panicked before returning a future"
                );
                {
                    let mut state = self.state.lock();
                    if token.is_cancelled() {
                        return Started::Aborted;
                    }
                    state.pending = None;
                    let snapshot = &mut state.snapshot;
                    snapshot.status = snapshot.fallback_status();
                    snapshot.has_settled = true;
                }
                self.publish();
                Started::Aborted
            }
        }
    }

    async fn complete(&self, fetch: PendingFetch<T, E>) {
        let PendingFetch { token, future } = fetch;

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => None,
            outcome = AssertUnwindSafe(future).catch_unwind() => Some(outcome),
        };
        let Some(outcome) = outcome else {
            debug!(identity = %self.identity, "superseded fetch dropped");
            return;
        };

        {
            let mut state = self.state.lock();
            if token.is_cancelled() {
                debug!(identity = %self.identity, "superseded result discarded");
                return;
            }
            state.pending = None;
            let snapshot = &mut state.snapshot;
            match outcome {
                Ok(Ok(data)) => {
                    snapshot.data = Some(data);
                    snapshot.error = None;
                    snapshot.status = QueryStatus::Success;
                }
                Ok(Err(err)) => {
                    snapshot.data = None;
                    snapshot.error = Some(err);
                    snapshot.status = QueryStatus::Error;
                }
                Err(panic) => {
                    error!(
                        identity = %self.identity,
                        panic = panic_message(panic.as_ref()),
                        "resolver panicked; keeping previous result"
                    );
                    snapshot.status = snapshot.fallback_status();
                }
            }
            snapshot.has_settled = true;
            debug!(identity = %self.identity, status = ?snapshot.status, "fetch settled");
        }
        self.publish();
    }

    /// Delivers the current state to every subscriber.
    ///
    /// A panicking subscriber is logged and skipped.
    fn publish(&self) {
        let _delivery = self.delivery.lock();
        let (snapshot, listeners) = {
            let state = self.state.lock();
            let listeners: Vec<_> = state
                .subscribers
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect();
            (state.snapshot.clone(), listeners)
        };

        for (id, listener) in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&snapshot))) {
                error!(
                    identity = %self.identity,
                    subscriber = id,
                    panic = panic_message(panic.as_ref()),
                    "subscriber panicked during notification"
                );
            }
        }
    }
}

impl<T, E> fmt::Debug for CacheEntry<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheEntry")
            .field("identity", &self.identity)
            .field("status", &state.snapshot.status)
            .field("pending", &state.pending.is_some())
            .field("subscribers", &state.subscribers.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Guard for a subscriber registration.
///
/// Dropping it unsubscribes, as does calling [`unsubscribe`](Self::unsubscribe).
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Removes the subscriber.
    pub fn unsubscribe(mut self) {
        self.remove_now();
    }

    fn remove_now(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Type-erased view of a [`CacheEntry`], used where the data type is not
/// known (invalidation, host events).
pub trait AnyEntry: Send + Sync {
    fn identity(&self) -> &KeyIdentity;

    fn status(&self) -> QueryStatus;

    fn subscriber_count(&self) -> usize;

    /// `std::any::type_name` of the concrete entry.
    fn type_name(&self) -> &'static str;

    /// Refetches and completes when the fetch settles or is superseded.
    fn refetch_boxed(self: Arc<Self>) -> BoxFuture<'static, ()>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T, E> AnyEntry for CacheEntry<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn identity(&self) -> &KeyIdentity {
        &self.identity
    }

    fn status(&self) -> QueryStatus {
        Self::status(self)
    }

    fn subscriber_count(&self) -> usize {
        Self::subscriber_count(self)
    }

    fn type_name(&self) -> &'static str {
        type_name::<Self>()
    }

    fn refetch_boxed(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move { self.refetch().await }.boxed()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
