use crate::types::{Feed, Result, TimelineError, TimelineItem, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Durable collection of users, feeds and ingested events. Passed into the
/// engine explicitly rather than held as ambient global state.
///
/// Implementations must enforce uniqueness of the upstream event id so that
/// concurrent inserts of the same event resolve to a single row, with the
/// losing writer observing `insert_item_if_absent` returning false.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn find_user(&self, login: &str) -> Result<Option<User>>;

    /// Create a user together with their initial feed subscriptions.
    async fn create_user(&self, login: &str, name: &str, feed_urls: &[String]) -> Result<User>;

    async fn add_feed(&self, user_id: Uuid, url: &str) -> Result<Feed>;

    async fn feeds_for_user(&self, user_id: Uuid) -> Result<Vec<Feed>>;

    async fn contains_item(&self, item_id: &str) -> Result<bool>;

    /// Insert-if-absent keyed by the upstream event id. Returns true when a
    /// row was written, false when the id already existed.
    async fn insert_item_if_absent(&self, item: &TimelineItem) -> Result<bool>;

    /// All unarchived items across the user's feeds, newest first.
    async fn unarchived_items(&self, user_id: Uuid) -> Result<Vec<TimelineItem>>;

    /// Flip archived on every listed item that exists, belongs to one of the
    /// user's feeds and is not already archived; ids failing any of those
    /// constraints are ignored. Returns the number of rows transitioned.
    async fn archive_items(&self, user_id: Uuid, item_ids: &[String]) -> Result<u64>;
}

pub struct PgTimelineStore {
    db: PgPool,
}

impl PgTimelineStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;
        Ok(Self { db })
    }

    fn row_to_item(row: &sqlx::postgres::PgRow) -> Result<TimelineItem> {
        Ok(TimelineItem {
            id: row.try_get("id")?,
            feed_id: row.try_get("feed_id")?,
            content: row.try_get::<Value, _>("content")?,
            date: row.try_get::<DateTime<Utc>, _>("date")?,
            archived: row.try_get("archived")?,
        })
    }
}

#[async_trait]
impl TimelineStore for PgTimelineStore {
    async fn find_user(&self, login: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, login, name FROM users WHERE login = $1")
            .bind(login)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => Ok(Some(User {
                id: row.try_get("id")?,
                login: row.try_get("login")?,
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_user(&self, login: &str, name: &str, feed_urls: &[String]) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            name: name.to_string(),
        };

        let mut tx = self.db.begin().await?;

        sqlx::query("INSERT INTO users (id, login, name) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.login)
            .bind(&user.name)
            .execute(&mut *tx)
            .await?;

        for url in feed_urls {
            sqlx::query("INSERT INTO feeds (id, user_id, url) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(user.id)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(login, feeds = feed_urls.len(), "created user");
        Ok(user)
    }

    async fn add_feed(&self, user_id: Uuid, url: &str) -> Result<Feed> {
        let feed = Feed {
            id: Uuid::new_v4(),
            user_id,
            url: url.to_string(),
        };

        sqlx::query("INSERT INTO feeds (id, user_id, url) VALUES ($1, $2, $3)")
            .bind(feed.id)
            .bind(feed.user_id)
            .bind(&feed.url)
            .execute(&self.db)
            .await?;

        info!(url, %user_id, "added feed");
        Ok(feed)
    }

    async fn feeds_for_user(&self, user_id: Uuid) -> Result<Vec<Feed>> {
        let rows = sqlx::query("SELECT id, user_id, url FROM feeds WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.db)
            .await?;

        let mut feeds = Vec::with_capacity(rows.len());
        for row in rows {
            feeds.push(Feed {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                url: row.try_get("url")?,
            });
        }
        Ok(feeds)
    }

    async fn contains_item(&self, item_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM timeline_items WHERE id = $1)")
            .bind(item_id)
            .fetch_one(&self.db)
            .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn insert_item_if_absent(&self, item: &TimelineItem) -> Result<bool> {
        // The primary key on id turns a concurrent double-insert into a
        // no-op for the second writer instead of an error.
        let result = sqlx::query(
            r#"
            INSERT INTO timeline_items (id, feed_id, content, date, archived)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&item.id)
        .bind(item.feed_id)
        .bind(&item.content)
        .bind(item.date)
        .bind(item.archived)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unarchived_items(&self, user_id: Uuid) -> Result<Vec<TimelineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT i.id, i.feed_id, i.content, i.date, i.archived
            FROM timeline_items i
            JOIN feeds f ON f.id = i.feed_id
            WHERE f.user_id = $1 AND i.archived = FALSE
            ORDER BY i.date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    async fn archive_items(&self, user_id: Uuid, item_ids: &[String]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE timeline_items
            SET archived = TRUE
            WHERE id = ANY($1)
              AND archived = FALSE
              AND feed_id IN (SELECT id FROM feeds WHERE user_id = $2)
            "#,
        )
        .bind(item_ids)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        debug!(
            requested = item_ids.len(),
            archived = result.rows_affected(),
            "archive pass"
        );
        Ok(result.rows_affected())
    }
}

/// In-memory store used by the test suite. Insert uniqueness is serialized
/// on the item map's write lock, mirroring the conflict-as-skip behavior of
/// the Postgres constraint.
#[derive(Default)]
pub struct MemoryTimelineStore {
    users: RwLock<HashMap<Uuid, User>>,
    feeds: RwLock<HashMap<Uuid, Feed>>,
    items: RwLock<HashMap<String, TimelineItem>>,
}

impl MemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn owned_feed_ids(&self, user_id: Uuid) -> Vec<Uuid> {
        self.feeds
            .read()
            .await
            .values()
            .filter(|feed| feed.user_id == user_id)
            .map(|feed| feed.id)
            .collect()
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn find_user(&self, login: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.login == login)
            .cloned())
    }

    async fn create_user(&self, login: &str, name: &str, feed_urls: &[String]) -> Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|user| user.login == login) {
            return Err(TimelineError::General(format!(
                "user {} already exists",
                login
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            name: name.to_string(),
        };
        users.insert(user.id, user.clone());
        drop(users);

        let mut feeds = self.feeds.write().await;
        for url in feed_urls {
            let feed = Feed {
                id: Uuid::new_v4(),
                user_id: user.id,
                url: url.clone(),
            };
            feeds.insert(feed.id, feed);
        }

        Ok(user)
    }

    async fn add_feed(&self, user_id: Uuid, url: &str) -> Result<Feed> {
        let feed = Feed {
            id: Uuid::new_v4(),
            user_id,
            url: url.to_string(),
        };
        self.feeds.write().await.insert(feed.id, feed.clone());
        Ok(feed)
    }

    async fn feeds_for_user(&self, user_id: Uuid) -> Result<Vec<Feed>> {
        Ok(self
            .feeds
            .read()
            .await
            .values()
            .filter(|feed| feed.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn contains_item(&self, item_id: &str) -> Result<bool> {
        Ok(self.items.read().await.contains_key(item_id))
    }

    async fn insert_item_if_absent(&self, item: &TimelineItem) -> Result<bool> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Ok(false);
        }
        items.insert(item.id.clone(), item.clone());
        Ok(true)
    }

    async fn unarchived_items(&self, user_id: Uuid) -> Result<Vec<TimelineItem>> {
        let owned = self.owned_feed_ids(user_id).await;
        let mut items: Vec<TimelineItem> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| !item.archived && owned.contains(&item.feed_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(items)
    }

    async fn archive_items(&self, user_id: Uuid, item_ids: &[String]) -> Result<u64> {
        let owned = self.owned_feed_ids(user_id).await;
        let mut items = self.items.write().await;
        let mut archived = 0;
        for item_id in item_ids {
            if let Some(item) = items.get_mut(item_id) {
                if !item.archived && owned.contains(&item.feed_id) {
                    item.archived = true;
                    archived += 1;
                }
            }
        }
        Ok(archived)
    }
}
