// Integration tests for deduplication, cancellation and key transitions

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tears_query::prelude::*;
use tokio::sync::oneshot;
use tokio::time::{Duration, timeout};

#[derive(Debug, Clone, PartialEq)]
struct User {
    name: String,
}

/// A resolver whose calls each wait on the next gate, in call order.
fn gated(
    gates: Vec<oneshot::Receiver<i32>>,
) -> impl Fn(ResolverInput) -> BoxFuture<'static, Result<i32, QueryError>>
+ Send
+ Sync
+ 'static {
    let gates = Arc::new(Mutex::new(VecDeque::from(gates)));
    move |_| {
        let gate = gates.lock().pop_front();
        async move {
            match gate {
                Some(gate) => gate
                    .await
                    .map_err(|e| QueryError::FetchError(e.to_string())),
                None => Err(QueryError::FetchError("no gate left".to_string())),
            }
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_same_identity_shares_one_entry() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = |calls: Arc<AtomicUsize>| {
        move |_: ResolverInput| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<usize, QueryError>(n) }
        }
    };

    let literal = client
        .create_query(query_key!["user", 1], counter(calls.clone()))
        .expect("fresh client");
    let dynamic = client
        .create_query(
            query_key!["user", KeyPart::dynamic(|| 1)],
            counter(calls.clone()),
        )
        .expect("same type");

    assert!(Arc::ptr_eq(&literal.entry(), &dynamic.entry()));
    assert_eq!(client.store().len(), 1);

    literal.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dynamic.data(), Some(1));

    literal.refetch().await;
    assert_eq!(dynamic.data(), Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_superseded_fetch_never_writes() {
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();
    let client = QueryClient::new();
    let handle = client
        .create_query_with_config(
            query_key!["answer"],
            gated(vec![first_rx, second_rx]),
            QueryConfig::new().enabled(false),
        )
        .expect("fresh client");

    let entry = handle.entry();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = entry.subscribe(move |snapshot| {
        sink.lock().push((snapshot.status, snapshot.data.clone()));
    });

    let first = entry.spawn_refetch();
    let second = entry.spawn_refetch();

    second_tx.send(2).expect("second call is waiting");
    second.await.expect("second fetch task");
    // The first call was cancelled; its late result goes nowhere.
    let _ = first_tx.send(1);
    first.await.expect("first fetch task");

    assert_eq!(handle.data(), Some(2));
    assert!(!handle.is_loading());
    assert_eq!(
        *seen.lock(),
        vec![
            (QueryStatus::Loading, None),
            (QueryStatus::Loading, None),
            (QueryStatus::Success, Some(2)),
        ]
    );
}

#[tokio::test]
async fn test_superseded_fetch_sees_cancellation() {
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let captured = tokens.clone();
    let client = QueryClient::new();
    let handle = client
        .create_query_with_config(
            query_key!["slow"],
            move |input: ResolverInput| {
                captured.lock().push(input.cancellation.clone());
                async move {
                    input.cancellation.cancelled().await;
                    Err::<i32, QueryError>(QueryError::FetchError("cancelled".to_string()))
                }
            },
            QueryConfig::new().enabled(false),
        )
        .expect("fresh client");

    let entry = handle.entry();
    let _first = entry.spawn_refetch();
    let _second = entry.spawn_refetch();

    let tokens = tokens.lock();
    assert_eq!(tokens.len(), 2);
    assert!(tokens[0].is_cancelled());
    assert!(!tokens[1].is_cancelled());
    assert!(handle.is_loading());
}

#[tokio::test]
async fn test_invalidate_unknown_key_is_noop() {
    let client = QueryClient::new();
    let _other = client
        .create_query_with_config(
            query_key!["known"],
            |_| async { Ok::<i32, QueryError>(1) },
            QueryConfig::new().enabled(false),
        )
        .expect("fresh client");

    assert!(!client.invalidate(&query_key!["unknown"]).await);
    assert_eq!(client.store().len(), 1);
    assert_eq!(client.store().identities(), vec!["known".to_string()]);
}

#[tokio::test]
async fn test_key_change_fetches_new_entry_once() {
    let client = QueryClient::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let fetch = |calls: Arc<Mutex<Vec<String>>>| {
        move |input: ResolverInput| {
            calls.lock().push(input.identity.to_string());
            async move { Ok::<String, QueryError>(format!("data for {}", input.identity)) }
        }
    };

    // Someone else already cached user:2.
    let other = client
        .create_query(query_key!["user", 2], fetch(calls.clone()))
        .expect("fresh client");
    other.settled().await;

    let id = Arc::new(AtomicI64::new(1));
    let current = id.clone();
    let handle = client
        .create_query(
            query_key!["user", KeyPart::dynamic(move || current.load(Ordering::SeqCst))],
            fetch(calls.clone()),
        )
        .expect("same type");
    handle.settled().await;
    let old_entry = handle.entry();
    assert_eq!(old_entry.subscriber_count(), 1);

    id.store(2, Ordering::SeqCst);
    assert!(handle.notify_key_may_have_changed().expect("same type"));

    assert_eq!(old_entry.subscriber_count(), 0);
    assert!(Arc::ptr_eq(&handle.entry(), &other.entry()));
    assert_eq!(other.entry().subscriber_count(), 2);

    let settled = handle.settled().await;
    assert_eq!(settled.data.as_deref(), Some("data for user:2"));
    assert_eq!(
        *calls.lock(),
        vec![
            "user:2".to_string(),
            "user:1".to_string(),
            "user:2".to_string(),
        ]
    );

    // Telling the handle again without a real change does nothing.
    assert!(!handle.notify_key_may_have_changed().expect("same type"));
    assert_eq!(calls.lock().len(), 3);
}

#[tokio::test]
async fn test_disabled_query_waits_for_refetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let handle = client
        .create_query_with_config(
            query_key!["lazy"],
            move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                async { Ok::<&'static str, QueryError>("loaded") }
            },
            QueryConfig::new().enabled(false),
        )
        .expect("fresh client");

    tokio::task::yield_now().await;
    assert!(!handle.is_loading());
    assert_eq!(handle.data(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    handle.refetch().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.data(), Some("loaded"));
}

#[tokio::test]
async fn test_failed_fetch_is_stored_until_next_success() {
    let client = QueryClient::new();
    let fail = Arc::new(AtomicUsize::new(1));
    let failing = fail.clone();
    let handle = client
        .create_query(query_key!["flaky"], move |_| {
            let fail = failing.load(Ordering::SeqCst) == 1;
            async move {
                if fail {
                    Err(QueryError::NetworkError("offline".to_string()))
                } else {
                    Ok::<i32, QueryError>(7)
                }
            }
        })
        .expect("fresh client");

    let failed = handle.settled().await;
    assert!(failed.is_error());
    assert!(!failed.is_loading());
    assert_eq!(failed.data, None);
    assert_eq!(
        handle.error(),
        Some(QueryError::NetworkError("offline".to_string()))
    );

    fail.store(0, Ordering::SeqCst);
    handle.refetch().await;
    assert_eq!(handle.data(), Some(7));
    assert_eq!(handle.error(), None);
}

#[tokio::test]
async fn test_invalidate_updates_existing_handle() {
    let client = QueryClient::new();
    let names = Arc::new(Mutex::new(VecDeque::from([
        "Ada".to_string(),
        "Ada Lovelace".to_string(),
    ])));
    let handle = client
        .create_query(query_key!["user", 1], move |_| {
            let name = names.lock().pop_front().unwrap_or_default();
            async move { Ok::<User, QueryError>(User { name }) }
        })
        .expect("fresh client");

    let first = handle.settled().await;
    assert_eq!(
        first.data,
        Some(User {
            name: "Ada".to_string()
        })
    );
    assert_eq!(first.error, None);
    assert!(!first.is_loading());

    assert!(client.invalidate(&query_key!["user", 1]).await);
    assert_eq!(
        handle.data(),
        Some(User {
            name: "Ada Lovelace".to_string()
        })
    );
}

#[tokio::test]
async fn test_watch_follows_entry_transitions() {
    let (tx, rx) = oneshot::channel();
    let client = QueryClient::new();
    let handle = client
        .create_query(query_key!["answer"], gated(vec![rx]))
        .expect("fresh client");

    let mut watch = handle.watch();
    assert!(watch.borrow().is_loading());

    tx.send(42).expect("call is waiting");
    let result = timeout(Duration::from_millis(500), watch.wait_for(QuerySnapshot::is_settled))
        .await
        .expect("should settle within timeout")
        .expect("handle is alive")
        .clone();
    assert_eq!(result.data, Some(42));
}

#[tokio::test]
async fn test_type_mismatch_is_reported() {
    let client = QueryClient::new();
    let _numbers = client
        .create_query(query_key!["shared"], |_| async { Ok::<i32, QueryError>(1) })
        .expect("fresh client");

    let err = client
        .create_query(query_key!["shared"], |_| async {
            Ok::<String, QueryError>("one".to_string())
        })
        .expect_err("identity holds another type");
    assert!(matches!(err, StoreError::TypeMismatch { .. }));
}
