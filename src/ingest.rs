use crate::store::TimelineStore;
use crate::types::{EventEnvelope, Feed, Result, TimelineError, TimelineItem};
use serde_json::Value;
use tracing::{debug, warn};

/// Per-event ingestion decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Already stored: upstream feeds are cumulative windows that overlap
    /// across polls, so re-fetches routinely replay known events.
    DuplicateSkip,
    /// The actor is the feed's owner; the timeline shows others' activity.
    SelfAuthoredSkip,
}

/// Aggregate result of one ingestion run. Per-event and per-feed failures
/// are contained here; the run itself always completes unless the store is
/// unavailable.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub feeds_fetched: usize,
    pub accepted: usize,
    pub duplicate: usize,
    pub self_authored: usize,
    pub malformed: usize,
    pub failed_feeds: Vec<FailedFeed>,
}

#[derive(Debug, Clone)]
pub struct FailedFeed {
    pub url: String,
    pub error: String,
}

impl IngestReport {
    pub fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Accepted => self.accepted += 1,
            IngestOutcome::DuplicateSkip => self.duplicate += 1,
            IngestOutcome::SelfAuthoredSkip => self.self_authored += 1,
        }
    }

    pub fn record_failed_feed(&mut self, url: &str, error: &TimelineError) {
        self.failed_feeds.push(FailedFeed {
            url: url.to_string(),
            error: error.to_string(),
        });
    }
}

/// Decide whether one raw event becomes a stored timeline item. Idempotent:
/// repeating the call for the same event id changes nothing, and batches may
/// be processed in any order since identity is keyed by the upstream id.
pub async fn ingest_event(
    store: &dyn TimelineStore,
    feed: &Feed,
    owner_login: &str,
    raw_event: &Value,
) -> Result<IngestOutcome> {
    // The duplicate lookup only needs the id; a known id is skipped before
    // the rest of the record is validated, so a re-fetched event whose
    // payload has since gone bad still counts as a duplicate.
    let event_id = EventEnvelope::parse_id(raw_event)?;
    if store.contains_item(&event_id).await? {
        return Ok(IngestOutcome::DuplicateSkip);
    }

    let envelope = EventEnvelope::parse(raw_event)?;

    if envelope.actor_login == owner_login {
        debug!(event_id = %envelope.id, "self-authored event, skipping");
        return Ok(IngestOutcome::SelfAuthoredSkip);
    }

    let item = TimelineItem {
        id: envelope.id,
        feed_id: feed.id,
        content: raw_event.clone(),
        date: envelope.date,
        archived: false,
    };

    // The check above is only a fast path; a concurrent run may have written
    // the same id in between. The store's uniqueness constraint settles the
    // race and the loser lands here as a duplicate.
    if store.insert_item_if_absent(&item).await? {
        Ok(IngestOutcome::Accepted)
    } else {
        Ok(IngestOutcome::DuplicateSkip)
    }
}

/// Ingest one fetched batch into its feed, tallying the outcome of every
/// event. Malformed events are logged and counted but never abort the batch;
/// store failures do.
pub async fn ingest_batch(
    store: &dyn TimelineStore,
    feed: &Feed,
    owner_login: &str,
    events: &[Value],
    report: &mut IngestReport,
) -> Result<()> {
    for raw_event in events {
        match ingest_event(store, feed, owner_login, raw_event).await {
            Ok(outcome) => report.record(outcome),
            Err(TimelineError::MalformedEvent { reason }) => {
                warn!(feed_url = %feed.url, %reason, "skipping malformed event");
                report.malformed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
