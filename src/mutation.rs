//! One-off mutations for creating, updating, or deleting remote data.
//!
//! A [`MutationHandle`] runs its mutator once per [`mutate`](MutationHandle::mutate)
//! call and keeps the outcome of the last call. Unlike queries, mutations have
//! no cache, no deduplication and no cancellation. After a successful mutation
//! you typically invalidate the queries it affected.
//!
//! # Example
//!
//! ```rust,no_run
//! use tears_query::prelude::*;
//!
//! # async fn demo(client: QueryClient) {
//! let rename = client.create_mutation(
//!     MutationOptions::new(|name: String| async move {
//!         Ok::<_, QueryError>(name.to_uppercase())
//!     })
//!     .on_error(|err: &QueryError| eprintln!("rename failed: {err}")),
//! );
//!
//! rename.mutate("ada".to_string()).await;
//! if rename.is_success() {
//!     client.invalidate(&query_key!["user", 1]).await;
//! }
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::debug;

use crate::error::QueryError;

type Mutator<I, O, E> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, E>> + Send + Sync>;
type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// The state of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<O, E> {
    /// Mutation is idle (not yet started).
    Idle,
    /// Mutation is in progress.
    Loading,
    /// Mutation succeeded with a result.
    Success(O),
    /// Mutation failed with an error.
    Error(E),
}

impl<O, E> MutationState<O, E> {
    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&O> {
        match self {
            Self::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the mutation failed, otherwise `None`.
    pub const fn error(&self) -> Option<&E> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if the mutation is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// The mutator and callbacks a [`MutationHandle`] is built from.
pub struct MutationOptions<I, O, E = QueryError> {
    mutator: Mutator<I, O, E>,
    on_success: Option<Callback<O>>,
    on_error: Option<Callback<E>>,
}

impl<I, O, E> MutationOptions<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// Creates options around an async mutator.
    pub fn new<F, Fut>(mutator: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        Self {
            mutator: Arc::new(move |input| mutator(input).boxed()),
            on_success: None,
            on_error: None,
        }
    }

    /// Called with the result of every successful mutation.
    #[must_use]
    pub fn on_success(mut self, callback: impl Fn(&O) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called with the error of every failed mutation.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

struct Inner<I, O, E> {
    mutator: Mutator<I, O, E>,
    on_success: Option<Callback<O>>,
    on_error: Option<Callback<E>>,
    tx: watch::Sender<MutationState<O, E>>,
}

/// A single-fire command object with its own isolated state.
///
/// Cloning yields another handle to the same mutation.
pub struct MutationHandle<I, O, E = QueryError> {
    inner: Arc<Inner<I, O, E>>,
}

impl<I, O, E> Clone for MutationHandle<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O, E> MutationHandle<I, O, E>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(options: MutationOptions<I, O, E>) -> Self {
        let (tx, _rx) = watch::channel(MutationState::Idle);
        Self {
            inner: Arc::new(Inner {
                mutator: options.mutator,
                on_success: options.on_success,
                on_error: options.on_error,
                tx,
            }),
        }
    }

    /// Runs the mutator with `input` and records the outcome.
    ///
    /// Errors are stored, not returned; read [`state`](Self::state) afterwards.
    pub async fn mutate(&self, input: I) {
        self.inner.tx.send_replace(MutationState::Loading);

        match (self.inner.mutator)(input).await {
            Ok(data) => {
                debug!("mutation succeeded");
                if let Some(on_success) = &self.inner.on_success {
                    on_success(&data);
                }
                self.inner.tx.send_replace(MutationState::Success(data));
            }
            Err(err) => {
                debug!("mutation failed");
                if let Some(on_error) = &self.inner.on_error {
                    on_error(&err);
                }
                self.inner.tx.send_replace(MutationState::Error(err));
            }
        }
    }

    pub fn state(&self) -> MutationState<O, E> {
        self.inner.tx.borrow().clone()
    }

    pub fn data(&self) -> Option<O> {
        self.inner.tx.borrow().data().cloned()
    }

    pub fn error(&self) -> Option<E> {
        self.inner.tx.borrow().error().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.tx.borrow().is_loading()
    }

    pub fn is_success(&self) -> bool {
        self.inner.tx.borrow().is_success()
    }

    pub fn is_error(&self) -> bool {
        self.inner.tx.borrow().is_error()
    }

    /// A receiver following every state change.
    pub fn watch(&self) -> watch::Receiver<MutationState<O, E>> {
        self.inner.tx.subscribe()
    }
}

impl<I, O: fmt::Debug, E: fmt::Debug> fmt::Debug for MutationHandle<I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHandle")
            .field("state", &*self.inner.tx.borrow())
            .finish_non_exhaustive()
    }
}
