use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Timestamp format used by the upstream event API.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub name: String,
}

/// A subscription to one remote event feed, owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
}

/// One ingested remote event. The id is the upstream event identifier and
/// doubles as the dedup key; content is the original payload kept verbatim
/// so the timeline can be re-rendered at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: String,
    pub feed_id: Uuid,
    pub content: Value,
    pub date: DateTime<Utc>,
    pub archived: bool,
}

/// The fields every raw event must carry regardless of its type, validated
/// before any ingestion decision is made.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: String,
    pub actor_login: String,
    pub date: DateTime<Utc>,
}

impl EventEnvelope {
    /// Extract just the upstream event id. Upstream sends it as a string,
    /// but older payloads carried a number. Kept separate from full
    /// envelope validation so the duplicate lookup can run before the rest
    /// of the record is inspected.
    pub fn parse_id(raw_event: &Value) -> Result<String> {
        match raw_event.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(TimelineError::MalformedEvent {
                reason: "missing event id".to_string(),
            }),
        }
    }

    /// Extract and validate the envelope of a raw event record.
    pub fn parse(raw_event: &Value) -> Result<Self> {
        let id = Self::parse_id(raw_event)?;

        let actor_login = raw_event
            .pointer("/actor/login")
            .and_then(Value::as_str)
            .ok_or_else(|| TimelineError::MalformedEvent {
                reason: format!("event {}: missing actor.login", id),
            })?
            .to_string();

        let created_at = raw_event
            .get("created_at")
            .and_then(Value::as_str)
            .ok_or_else(|| TimelineError::MalformedEvent {
                reason: format!("event {}: missing created_at", id),
            })?;

        let date = NaiveDateTime::parse_from_str(created_at, EVENT_TIME_FORMAT)
            .map_err(|e| TimelineError::MalformedEvent {
                reason: format!("event {}: bad created_at {:?}: {}", id, created_at, e),
            })?
            .and_utc();

        Ok(Self {
            id,
            actor_login,
            date,
        })
    }
}

/// Identity of the authenticated token's user, as returned by `GET /user`.
#[derive(Debug, Clone, Deserialize)]
pub struct Viewer {
    pub login: String,
    pub name: Option<String>,
}

/// Display bucket a classified event is grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// The viewer's own repositories, regardless of who acted on them.
    Personal,
    Repo,
    Issue,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Personal => "personal",
            Category::Repo => "repo",
            Category::Issue => "issue",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One renderable timeline row handed to the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub id: String,
    pub html: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_base: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_concurrent_fetches: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            user_agent: "gh-timeline/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 1,
            max_concurrent_fetches: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    #[error("feed unavailable: {url}: {reason}")]
    FeedUnavailable { url: String, reason: String },

    #[error("unknown user: {login}")]
    UserNotFound { login: String },

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, TimelineError>;
