pub mod classifier;
pub mod engine;
pub mod fetcher;
pub mod ingest;
pub mod store;
pub mod types;
pub mod utils;

pub use classifier::{Classification, EventClassifier, RenderedEvent};
pub use engine::TimelineEngine;
pub use fetcher::{EventSource, HttpEventFetcher};
pub use ingest::{ingest_event, FailedFeed, IngestOutcome, IngestReport};
pub use store::{MemoryTimelineStore, PgTimelineStore, TimelineStore};
pub use types::*;
