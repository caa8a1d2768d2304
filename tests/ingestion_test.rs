use async_trait::async_trait;
use gh_timeline::{
    EventSource, FetchConfig, MemoryTimelineStore, Result, TimelineEngine, TimelineError,
    TimelineStore, Viewer,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const DEFAULT_FEED: &str = "https://api.github.com/users/alice/received_events";

/// Event source returning canned batches per feed URL; unknown URLs fail the
/// way an unreachable upstream would.
struct ScriptedSource {
    batches: HashMap<String, Vec<Value>>,
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn fetch_events(&self, feed_url: &str) -> Result<Vec<Value>> {
        match self.batches.get(feed_url) {
            Some(events) => Ok(events.clone()),
            None => Err(TimelineError::FeedUnavailable {
                url: feed_url.to_string(),
                reason: "HTTP 502: Bad Gateway".to_string(),
            }),
        }
    }

    async fn viewer(&self) -> Result<Viewer> {
        Ok(Viewer {
            login: "alice".to_string(),
            name: Some("Alice".to_string()),
        })
    }
}

fn watch_event(id: &str, actor: &str, repo: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "type": "WatchEvent",
        "actor": { "login": actor },
        "repo": { "name": repo },
        "created_at": created_at,
        "payload": {},
    })
}

fn engine_with(batches: HashMap<String, Vec<Value>>) -> (TimelineEngine, Arc<MemoryTimelineStore>) {
    let store = Arc::new(MemoryTimelineStore::new());
    let source = Arc::new(ScriptedSource { batches });
    let engine = TimelineEngine::new(store.clone(), source, FetchConfig::default());
    (engine, store)
}

async fn stored_ids(store: &MemoryTimelineStore, login: &str) -> Vec<String> {
    let user = store
        .find_user(login)
        .await
        .expect("store available")
        .expect("user exists");
    let mut ids: Vec<String> = store
        .unarchived_items(user.id)
        .await
        .expect("store available")
        .into_iter()
        .map(|item| item.id)
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn ingestion_is_idempotent_across_runs() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let batch = vec![watch_event("1", "bob", "bob/x", "2014-01-01T00:00:00Z")];
    let (engine, store) = engine_with(HashMap::from([(DEFAULT_FEED.to_string(), batch)]));

    engine.register_user().await?;

    let report = engine.run_ingestion("alice").await?;
    assert_eq!(report.accepted, 1);
    assert_eq!(report.duplicate, 0);
    assert_eq!(stored_ids(&store, "alice").await, vec!["1"]);

    // replaying the same cumulative window must not create a second row
    let report = engine.run_ingestion("alice").await?;
    assert_eq!(report.accepted, 0);
    assert_eq!(report.duplicate, 1);
    assert_eq!(stored_ids(&store, "alice").await, vec!["1"]);

    info!("idempotency verified");
    Ok(())
}

#[tokio::test]
async fn self_authored_events_are_never_stored() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let batch = vec![watch_event("1", "alice", "bob/x", "2014-01-01T00:00:00Z")];
    let (engine, store) = engine_with(HashMap::from([(DEFAULT_FEED.to_string(), batch)]));

    engine.register_user().await?;
    let report = engine.run_ingestion("alice").await?;

    assert_eq!(report.accepted, 0);
    assert_eq!(report.self_authored, 1);
    assert!(stored_ids(&store, "alice").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn ingestion_is_order_independent() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let events = vec![
        watch_event("1", "bob", "bob/x", "2014-01-01T00:00:00Z"),
        watch_event("2", "carol", "carol/y", "2014-01-02T00:00:00Z"),
        watch_event("3", "dave", "dave/z", "2014-01-03T00:00:00Z"),
    ];
    let mut reversed = events.clone();
    reversed.reverse();

    let (forward_engine, forward_store) =
        engine_with(HashMap::from([(DEFAULT_FEED.to_string(), events)]));
    forward_engine.register_user().await?;
    forward_engine.run_ingestion("alice").await?;

    let (reverse_engine, reverse_store) =
        engine_with(HashMap::from([(DEFAULT_FEED.to_string(), reversed)]));
    reverse_engine.register_user().await?;
    reverse_engine.run_ingestion("alice").await?;

    assert_eq!(
        stored_ids(&forward_store, "alice").await,
        stored_ids(&reverse_store, "alice").await
    );
    Ok(())
}

#[tokio::test]
async fn malformed_events_skip_without_aborting_the_batch() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let batch = vec![
        json!({
            "id": "1",
            "type": "WatchEvent",
            "actor": { "login": "bob" },
            "repo": { "name": "bob/x" },
            "created_at": "not-a-timestamp",
            "payload": {},
        }),
        // no actor at all
        json!({
            "id": "2",
            "type": "WatchEvent",
            "repo": { "name": "bob/x" },
            "created_at": "2014-01-01T00:00:00Z",
        }),
        watch_event("3", "bob", "bob/x", "2014-01-02T00:00:00Z"),
    ];
    let (engine, store) = engine_with(HashMap::from([(DEFAULT_FEED.to_string(), batch)]));

    engine.register_user().await?;
    let report = engine.run_ingestion("alice").await?;

    assert_eq!(report.malformed, 2);
    assert_eq!(report.accepted, 1);
    assert_eq!(stored_ids(&store, "alice").await, vec!["3"]);
    Ok(())
}

#[tokio::test]
async fn failing_feed_does_not_abort_the_run() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let batch = vec![watch_event("1", "bob", "bob/x", "2014-01-01T00:00:00Z")];
    let (engine, store) = engine_with(HashMap::from([(DEFAULT_FEED.to_string(), batch)]));

    engine.register_user().await?;
    engine
        .add_feed("alice", "https://api.github.com/orgs/unreachable/events")
        .await?;

    let report = engine.run_ingestion("alice").await?;

    assert_eq!(report.feeds_fetched, 1);
    assert_eq!(report.failed_feeds.len(), 1);
    assert_eq!(
        report.failed_feeds[0].url,
        "https://api.github.com/orgs/unreachable/events"
    );
    // the healthy feed still landed
    assert_eq!(report.accepted, 1);
    assert_eq!(stored_ids(&store, "alice").await, vec!["1"]);
    Ok(())
}

#[tokio::test]
async fn duplicate_ids_within_one_batch_store_once() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let batch = vec![
        watch_event("1", "bob", "bob/x", "2014-01-01T00:00:00Z"),
        watch_event("1", "bob", "bob/x", "2014-01-01T00:00:00Z"),
    ];
    let (engine, store) = engine_with(HashMap::from([(DEFAULT_FEED.to_string(), batch)]));

    engine.register_user().await?;
    let report = engine.run_ingestion("alice").await?;

    assert_eq!(report.accepted, 1);
    assert_eq!(report.duplicate, 1);
    assert_eq!(stored_ids(&store, "alice").await, vec!["1"]);
    Ok(())
}

#[tokio::test]
async fn over_long_event_ids_are_stored_like_any_other() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    // ids are opaque upstream tokens with no length bound
    let long_id = "9".repeat(64);
    let batch = vec![
        watch_event(&long_id, "bob", "bob/x", "2014-01-01T00:00:00Z"),
        watch_event("2", "carol", "carol/y", "2014-01-02T00:00:00Z"),
    ];
    let (engine, store) = engine_with(HashMap::from([(DEFAULT_FEED.to_string(), batch)]));

    engine.register_user().await?;
    let report = engine.run_ingestion("alice").await?;

    assert_eq!(report.accepted, 2);
    assert!(report.failed_feeds.is_empty());
    assert_eq!(stored_ids(&store, "alice").await, vec!["2".to_string(), long_id]);
    Ok(())
}

#[tokio::test]
async fn known_ids_skip_as_duplicates_even_when_the_refetched_payload_is_bad() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let batch = vec![watch_event("1", "bob", "bob/x", "2014-01-01T00:00:00Z")];
    let (engine, store) = engine_with(HashMap::from([(DEFAULT_FEED.to_string(), batch)]));

    engine.register_user().await?;
    engine.run_ingestion("alice").await?;
    assert_eq!(stored_ids(&store, "alice").await, vec!["1"]);

    // the same id comes back with an unparseable timestamp: the duplicate
    // lookup decides before the rest of the record is validated
    let user = store.find_user("alice").await?.expect("user exists");
    let feed = store.feeds_for_user(user.id).await?.remove(0);
    let refetched = json!({
        "id": "1",
        "type": "WatchEvent",
        "actor": { "login": "bob" },
        "repo": { "name": "bob/x" },
        "created_at": "not-a-timestamp",
        "payload": {},
    });

    let outcome = gh_timeline::ingest_event(&*store, &feed, "alice", &refetched).await?;
    assert_eq!(outcome, gh_timeline::IngestOutcome::DuplicateSkip);
    assert_eq!(stored_ids(&store, "alice").await, vec!["1"]);
    Ok(())
}

#[tokio::test]
async fn register_user_is_idempotent_and_creates_the_default_feed() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let (engine, store) = engine_with(HashMap::new());

    let first = engine.register_user().await?;
    let second = engine.register_user().await?;
    assert_eq!(first.id, second.id);

    let feeds = store.feeds_for_user(first.id).await?;
    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].url, DEFAULT_FEED);
    Ok(())
}

#[tokio::test]
async fn add_feed_rejects_unfetchable_urls() -> Result<()> {
    let _ = tracing_subscriber::fmt().try_init();

    let (engine, _store) = engine_with(HashMap::new());
    engine.register_user().await?;

    assert!(engine.add_feed("alice", "ftp://example.com/events").await.is_err());
    assert!(engine.add_feed("alice", "not a url").await.is_err());
    assert!(engine
        .add_feed("alice", "https://api.github.com/orgs/acme/events")
        .await
        .is_ok());
    Ok(())
}
