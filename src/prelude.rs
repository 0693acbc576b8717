//! Prelude module for convenient imports.
//!
//! ```
//! use tears_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] - Creates queries and mutations, routes invalidation
//! - [`QueryHandle`] - A live query bound to its cache entry
//! - [`MutationHandle`] and [`MutationOptions`] - One-off mutations
//! - [`QueryKey`], [`KeyPart`], [`KeyValue`] and the [`query_key!`] macro
//! - [`QueryConfig`], [`QuerySnapshot`], [`QueryStatus`]
//! - [`HostEvent`] and [`HostEvents`] - Focus and navigation triggers
//! - [`QueryError`] and [`StoreError`]

pub use crate::client::QueryClient;
pub use crate::config::QueryConfig;
pub use crate::entry::{QuerySnapshot, QueryStatus, ResolverInput};
pub use crate::error::{QueryError, StoreError};
pub use crate::host::{HostEvent, HostEvents, ListenerHandle};
pub use crate::key::{KeyIdentity, KeyPart, KeyValue, QueryKey, hash_key};
pub use crate::mutation::{MutationHandle, MutationOptions, MutationState};
pub use crate::query::QueryHandle;
pub use crate::query_key;
