//! A user profile screen backed by a fake in-memory API.
//!
//! Run with `RUST_LOG=tears_query=debug cargo run --example profile` to see
//! fetches start, get superseded and settle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use color_eyre::eyre::Result;
use parking_lot::Mutex;
use tears_query::prelude::*;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone)]
struct User {
    id: i64,
    name: String,
}

/// Stands in for a remote server.
#[derive(Clone, Default)]
struct FakeApi {
    users: Arc<Mutex<HashMap<i64, String>>>,
}

impl FakeApi {
    fn seeded() -> Self {
        let api = Self::default();
        api.users.lock().extend([
            (1, "Ada".to_string()),
            (2, "Grace".to_string()),
        ]);
        api
    }

    async fn fetch_user(&self, id: i64) -> Result<User, QueryError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.users
            .lock()
            .get(&id)
            .map(|name| User {
                id,
                name: name.clone(),
            })
            .ok_or_else(|| QueryError::FetchError(format!("no user {id}")))
    }

    async fn rename(&self, id: i64, name: String) -> Result<(), QueryError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.users.lock().insert(id, name);
        Ok(())
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact().with_target(true))
        .init();
}

fn report(label: &str, snapshot: &QuerySnapshot<User, QueryError>) {
    match (snapshot.status, &snapshot.data, &snapshot.error) {
        (QueryStatus::Loading, _, _) => info!(label, identity = %snapshot.identity, "loading"),
        (_, Some(user), _) => info!(label, id = user.id, name = %user.name, "loaded"),
        (_, _, Some(err)) => info!(label, error = %err, "failed"),
        _ => info!(label, "idle"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let api = FakeApi::seeded();
    let client = QueryClient::new();
    let events = HostEvents::new();
    let listener = client.listen(&events);

    let selected = Arc::new(AtomicI64::new(1));
    let profile = client.create_query(
        query_key![
            "user",
            KeyPart::dynamic({
                let selected = selected.clone();
                move || selected.load(Ordering::SeqCst)
            })
        ],
        {
            let api = api.clone();
            move |input: ResolverInput| {
                let api = api.clone();
                async move {
                    let id = match input.key.get(1) {
                        Some(KeyValue::Int(id)) => *id,
                        _ => return Err(QueryError::FetchError("bad user key".to_string())),
                    };
                    api.fetch_user(id).await
                }
            }
        },
    )?;
    report("initial", &profile.settled().await);

    // Switch to another user.
    selected.store(2, Ordering::SeqCst);
    profile.notify_key_may_have_changed()?;
    report("switched", &profile.settled().await);

    // Rename the user, then invalidate their profile.
    let rename = client.create_mutation(
        MutationOptions::new({
            let api = api.clone();
            move |(id, name): (i64, String)| {
                let api = api.clone();
                async move { api.rename(id, name).await }
            }
        })
        .on_success(|_: &()| info!("rename saved")),
    );
    rename.mutate((2, "Grace Hopper".to_string())).await;
    if rename.is_success() {
        client.invalidate(&query_key!["user", 2]).await;
    }
    report("after rename", &profile.snapshot());

    // The window regains focus: the profile refetches in the background.
    let mut rx = profile.watch();
    events.emit(HostEvent::Visible)?;
    rx.changed().await?;
    report("refocused", &*rx.wait_for(QuerySnapshot::is_settled).await?);

    listener.cancel().await;
    Ok(())
}
