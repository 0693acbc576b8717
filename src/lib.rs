//! # Tears Query - keyed data-fetching cache
//!
//! Tears Query fetches remote or derived data once per key, shares the result
//! with every consumer asking for the same key, deduplicates concurrent
//! fetches and refetches on well-defined triggers. It is built for
//! interactive front-ends where many views may request the same data at once,
//! similar to SWR or TanStack Query.
//!
//! ## Architecture
//!
//! 1. **Key**: a [`QueryKey`](key::QueryKey) is hashed into a
//!    [`KeyIdentity`](key::KeyIdentity) by evaluating its parts
//! 2. **Store**: a [`QueryCacheStore`](store::QueryCacheStore) maps each
//!    identity to exactly one [`CacheEntry`](entry::CacheEntry)
//! 3. **Entry**: owns fetch state, cancels superseded fetches and notifies
//!    subscribers
//! 4. **Handle**: a [`QueryHandle`](query::QueryHandle) follows its key from
//!    entry to entry and mirrors the bound entry's state
//! 5. **Client**: a [`QueryClient`](client::QueryClient) creates queries and
//!    mutations, routes invalidations and host events
//!
//! ## Guarantees
//!
//! - At most one entry exists per identity in a store.
//! - At most one fetch is in flight per entry; starting one cancels the last.
//! - A cancelled fetch never writes to its entry.
//! - A handle always reports exactly the state of the entry it is bound to.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tears_query::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct User {
//!     name: String,
//! }
//!
//! async fn fetch_user(id: i64) -> Result<User, QueryError> {
//!     Ok(User { name: format!("user #{id}") })
//! }
//!
//! # async fn demo() -> Result<(), StoreError> {
//! let client = QueryClient::new();
//!
//! let user = client.create_query(query_key!["user", 1], |input| async move {
//!     let id = match input.key.get(1) {
//!         Some(KeyValue::Int(id)) => *id,
//!         _ => return Err(QueryError::FetchError("missing id".to_string())),
//!     };
//!     fetch_user(id).await
//! })?;
//!
//! let state = user.settled().await;
//! println!("{:?}", state.data);
//!
//! // Later, after the user was edited:
//! client.invalidate(&query_key!["user", 1]).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod host;
pub mod key;
pub mod mutation;
pub mod prelude;
pub mod query;
pub mod store;
