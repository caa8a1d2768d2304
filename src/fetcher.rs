use crate::types::{FetchConfig, Result, TimelineError, Viewer};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Authenticated retrieval from the upstream event API. One call fetches one
/// batch for one feed URL; failures affect only that feed. The trait is the
/// seam where a future pacing or backoff layer can wrap the fetcher without
/// changing its contract.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// One retrieval of a feed URL, returning raw event records in upstream
    /// order (not guaranteed sorted).
    async fn fetch_events(&self, feed_url: &str) -> Result<Vec<Value>>;

    /// Identity of the token's user (`GET /user`).
    async fn viewer(&self) -> Result<Viewer>;
}

pub struct HttpEventFetcher {
    client: Client,
    config: FetchConfig,
    token: String,
}

impl HttpEventFetcher {
    pub fn new(token: String, config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            token,
        })
    }

    /// Absolute feed URLs pass through; API paths resolve against the
    /// configured base.
    fn resolve_url(&self, feed_url: &str) -> Result<Url> {
        let base = Url::parse(&self.config.api_base)?;
        Ok(base.join(feed_url)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut backoff = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json")
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<T>().await?);
                    }

                    let failure = TimelineError::FeedUnavailable {
                        url: url.to_string(),
                        reason: format!(
                            "HTTP {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("Unknown")
                        ),
                    };

                    // 4xx will not improve on retry
                    if status.is_client_error() {
                        return Err(failure);
                    }
                    last_error = Some(failure);
                }
                Err(e) => {
                    last_error = Some(TimelineError::Http(e));
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!(
                        "attempt {} failed for {}, retrying in {:?}",
                        attempt + 1,
                        url,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TimelineError::FeedUnavailable {
            url: url.to_string(),
            reason: "retries exhausted".to_string(),
        }))
    }
}

#[async_trait]
impl EventSource for HttpEventFetcher {
    async fn fetch_events(&self, feed_url: &str) -> Result<Vec<Value>> {
        let url = self.resolve_url(feed_url)?;
        debug!(%url, "fetching event batch");

        let events: Vec<Value> = self.get_json(url).await?;

        info!(feed_url, count = events.len(), "fetched event batch");
        Ok(events)
    }

    async fn viewer(&self) -> Result<Viewer> {
        let url = self.resolve_url("/user")?;
        self.get_json(url).await
    }
}
