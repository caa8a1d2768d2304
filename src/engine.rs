use crate::classifier::{Classification, EventClassifier};
use crate::fetcher::EventSource;
use crate::ingest::{ingest_batch, IngestReport};
use crate::store::TimelineStore;
use crate::types::{
    Category, Feed, FetchConfig, Result, TimelineEntry, TimelineError, User,
};
use futures::stream::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

/// Composition root of the ingestion and rendering pipeline. Store and
/// event-source handles are injected; the engine owns no ambient state.
pub struct TimelineEngine {
    store: Arc<dyn TimelineStore>,
    source: Arc<dyn EventSource>,
    classifier: EventClassifier,
    config: FetchConfig,
}

impl TimelineEngine {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        source: Arc<dyn EventSource>,
        config: FetchConfig,
    ) -> Self {
        Self {
            store,
            source,
            classifier: EventClassifier::new(),
            config,
        }
    }

    async fn require_user(&self, login: &str) -> Result<User> {
        self.store
            .find_user(login)
            .await?
            .ok_or_else(|| TimelineError::UserNotFound {
                login: login.to_string(),
            })
    }

    /// Resolve the token's user and create it on first sight, together with
    /// the default feed derived from the login. Safe to repeat.
    pub async fn register_user(&self) -> Result<User> {
        let viewer = self.source.viewer().await?;

        if let Some(user) = self.store.find_user(&viewer.login).await? {
            return Ok(user);
        }

        let default_feed = format!(
            "{}/users/{}/received_events",
            self.config.api_base.trim_end_matches('/'),
            viewer.login
        );
        let name = viewer.name.unwrap_or_else(|| viewer.login.clone());
        let user = self
            .store
            .create_user(&viewer.login, &name, &[default_feed])
            .await?;

        info!(login = %user.login, "registered user with default feed");
        Ok(user)
    }

    /// Subscribe a user to an additional event feed URL.
    pub async fn add_feed(&self, login: &str, url: &str) -> Result<Feed> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
            return Err(TimelineError::General(format!(
                "not a fetchable feed URL: {}",
                url
            )));
        }

        let user = self.require_user(login).await?;
        self.store.add_feed(user.id, url).await
    }

    /// Run one ingestion pass over all of the user's feeds. Feed batches are
    /// retrieved on a bounded worker pool; a failing feed is reported in the
    /// returned summary and never aborts the others. Safe to retry: every
    /// per-event decision is idempotent.
    pub async fn run_ingestion(&self, login: &str) -> Result<IngestReport> {
        let user = self.require_user(login).await?;
        let feeds = self.store.feeds_for_user(user.id).await?;

        info!(login, feeds = feeds.len(), "starting ingestion run");

        let mut report = IngestReport::default();

        let mut fetches = futures::stream::iter(feeds.into_iter().map(|feed| {
            let source = Arc::clone(&self.source);
            async move {
                let events = source.fetch_events(&feed.url).await;
                (feed, events)
            }
        }))
        .buffer_unordered(self.config.max_concurrent_fetches.max(1));

        while let Some((feed, fetched)) = fetches.next().await {
            match fetched {
                Ok(events) => {
                    report.feeds_fetched += 1;
                    ingest_batch(&*self.store, &feed, &user.login, &events, &mut report).await?;
                }
                Err(e) => {
                    error!(feed_url = %feed.url, error = %e, "feed fetch failed");
                    report.record_failed_feed(&feed.url, &e);
                }
            }
        }

        info!(
            login,
            accepted = report.accepted,
            duplicate = report.duplicate,
            self_authored = report.self_authored,
            malformed = report.malformed,
            failed_feeds = report.failed_feeds.len(),
            "ingestion run finished"
        );
        Ok(report)
    }

    /// The viewer's unarchived timeline: newest first, classified, Skips
    /// dropped, grouped by category. The returned HTML strings are safe for
    /// direct embedding; the UI layer is responsible only for layout.
    pub async fn timeline(&self, login: &str) -> Result<BTreeMap<Category, Vec<TimelineEntry>>> {
        let user = self.require_user(login).await?;
        let items = self.store.unarchived_items(user.id).await?;

        let mut grouped: BTreeMap<Category, Vec<TimelineEntry>> = BTreeMap::new();
        for item in items {
            match self.classifier.classify(&item.content, &user.login) {
                Classification::Rendered(rendered) => {
                    grouped
                        .entry(rendered.category)
                        .or_default()
                        .push(TimelineEntry {
                            id: item.id,
                            html: rendered.html,
                            date: item.date,
                        });
                }
                Classification::Skip => {}
            }
        }
        Ok(grouped)
    }

    /// Mark items as read. Ids that do not exist, belong to someone else or
    /// are already archived are ignored, so the call is idempotent and safe
    /// against stale input. Returns the number of items transitioned.
    pub async fn archive(&self, login: &str, item_ids: &[String]) -> Result<u64> {
        let user = self.require_user(login).await?;
        let archived = self.store.archive_items(user.id, item_ids).await?;
        info!(login, requested = item_ids.len(), archived, "archived items");
        Ok(archived)
    }
}
