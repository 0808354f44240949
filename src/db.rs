use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::config::SourceConfig;

/// Format a timestamp the way every column stores it, so text order is time order
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Tier {
    Free,
    Pro,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "FREE",
            Tier::Pro => "PRO",
            Tier::Premium => "PREMIUM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Channel {
    Email,
    Telegram,
    Webhook,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Telegram => "TELEGRAM",
            Channel::Webhook => "WEBHOOK",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub kind: String,
    pub item_selector: String,
    pub title_selector: String,
    pub description_selector: String,
    pub image_selector: String,
    pub enabled: bool,
    pub last_crawled: Option<String>,
    pub last_error: Option<String>,
}

impl Source {
    /// Label stored on every article crawled from this source
    pub fn label(&self) -> String {
        self.name.to_uppercase()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NewsItem {
    pub id: i64,
    pub source_id: Option<i64>,
    pub source: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub image_url: Option<String>,
    pub tags: String,
    pub published_at: String,
    pub crawled_at: String,
}

impl NewsItem {
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }
}

/// An article ready to be stored
#[derive(Debug, Clone)]
pub struct NewNews {
    pub source_id: Option<i64>,
    pub source: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub subscription_tier: Tier,
    pub api_key: String,
    pub enabled: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub subscription_tier: Tier,
    pub api_key: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Alert {
    pub id: i64,
    pub user_id: i64,
    pub keyword: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub channel: Channel,
    pub target: String,
    pub enabled: bool,
    pub last_triggered_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: i64,
    pub keyword: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub channel: Channel,
    pub target: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Delivery {
    pub id: i64,
    pub alert_id: i64,
    pub news_id: i64,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_users: i64,
    pub total_news: i64,
    pub total_alerts: i64,
    pub total_sources: i64,
    pub enabled_sources: i64,
    pub active_alerts: i64,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to an in-memory database gets its own copy
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'html',
                item_selector TEXT NOT NULL,
                title_selector TEXT NOT NULL,
                description_selector TEXT NOT NULL,
                image_selector TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_crawled TEXT,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY,
                source_id INTEGER REFERENCES sources(id),
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                search_text TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                image_url TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                published_at TEXT NOT NULL,
                crawled_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_news_published
            ON news(published_at DESC, id DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_news_source ON news(source)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                full_name TEXT NOT NULL,
                role TEXT NOT NULL,
                subscription_tier TEXT NOT NULL,
                api_key TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                keyword TEXT NOT NULL,
                is_regex INTEGER NOT NULL DEFAULT 0,
                case_sensitive INTEGER NOT NULL DEFAULT 0,
                channel TEXT NOT NULL,
                target TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_triggered_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_deliveries (
                id INTEGER PRIMARY KEY,
                alert_id INTEGER NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
                news_id INTEGER NOT NULL REFERENCES news(id),
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(alert_id, news_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Sources

    pub async fn sync_sources(&self, configs: &[SourceConfig]) -> anyhow::Result<()> {
        for config in configs {
            let selectors = config.selectors();
            sqlx::query(
                r#"
                INSERT INTO sources (name, url, kind, item_selector, title_selector,
                                     description_selector, image_selector, enabled)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    url = excluded.url,
                    kind = excluded.kind,
                    item_selector = excluded.item_selector,
                    title_selector = excluded.title_selector,
                    description_selector = excluded.description_selector,
                    image_selector = excluded.image_selector,
                    enabled = excluded.enabled
                "#,
            )
            .bind(&config.name)
            .bind(&config.url)
            .bind(config.kind.as_str())
            .bind(&selectors.item)
            .bind(&selectors.title)
            .bind(&selectors.description)
            .bind(&selectors.image)
            .bind(config.enabled)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_all_sources(&self) -> anyhow::Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources)
    }

    pub async fn get_enabled_sources(&self) -> anyhow::Result<Vec<Source>> {
        let sources =
            sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE enabled = 1 ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(sources)
    }

    pub async fn get_source(&self, source_id: i64) -> anyhow::Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    /// Returns false when no source has the given id
    pub async fn set_source_enabled(&self, source_id: i64, enabled: bool) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE sources SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_source_crawled(
        &self,
        source_id: i64,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE sources SET last_crawled = ?, last_error = ? WHERE id = ?")
            .bind(timestamp(Utc::now()))
            .bind(error)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // News

    /// Store an article unless its URL is already known
    pub async fn insert_news_if_new(&self, news: &NewNews) -> anyhow::Result<Option<NewsItem>> {
        let tags = serde_json::to_string(&news.tags)?;

        let result = sqlx::query(
            r#"
            INSERT INTO news (source_id, source, title, search_text, url, description,
                              image_url, tags, published_at, crawled_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(news.source_id)
        .bind(&news.source)
        .bind(&news.title)
        .bind(news.title.to_lowercase())
        .bind(&news.url)
        .bind(&news.description)
        .bind(news.image_url.as_deref())
        .bind(tags)
        .bind(timestamp(news.published_at))
        .bind(timestamp(news.crawled_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_news(result.last_insert_rowid()).await
    }

    pub async fn get_news(&self, news_id: i64) -> anyhow::Result<Option<NewsItem>> {
        let item = sqlx::query_as::<_, NewsItem>(
            r#"
            SELECT id, source_id, source, title, url, description, image_url, tags,
                   published_at, crawled_at
            FROM news WHERE id = ?
            "#,
        )
        .bind(news_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn get_news_page(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<NewsItem>> {
        let items = sqlx::query_as::<_, NewsItem>(
            r#"
            SELECT id, source_id, source, title, url, description, image_url, tags,
                   published_at, crawled_at
            FROM news
            ORDER BY published_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn count_news(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Case-insensitive title search
    pub async fn search_news(
        &self,
        keyword: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<NewsItem>> {
        let items = sqlx::query_as::<_, NewsItem>(
            r#"
            SELECT id, source_id, source, title, url, description, image_url, tags,
                   published_at, crawled_at
            FROM news
            WHERE instr(search_text, ?) > 0
            ORDER BY published_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(keyword.to_lowercase())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn count_search(&self, keyword: &str) -> anyhow::Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM news WHERE instr(search_text, ?) > 0")
                .bind(keyword.to_lowercase())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    pub async fn get_news_by_source(
        &self,
        source: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<NewsItem>> {
        let items = sqlx::query_as::<_, NewsItem>(
            r#"
            SELECT id, source_id, source, title, url, description, image_url, tags,
                   published_at, crawled_at
            FROM news
            WHERE source = ?
            ORDER BY published_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(source.to_uppercase())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn count_by_source(&self, source: &str) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news WHERE source = ?")
            .bind(source.to_uppercase())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // Users

    pub async fn create_user(&self, user: &NewUser) -> anyhow::Result<User> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash, full_name, role, subscription_tier,
                               api_key, enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.role)
        .bind(user.subscription_tier)
        .bind(&user.api_key)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.get_user(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("User vanished after insert"))
    }

    pub async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Returns false when no user has the given id
    pub async fn set_subscription_tier(&self, user_id: i64, tier: Tier) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE users SET subscription_tier = ? WHERE id = ?")
            .bind(tier)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_users(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // Alerts

    pub async fn create_alert(&self, alert: &NewAlert) -> anyhow::Result<Alert> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (user_id, keyword, is_regex, case_sensitive, channel, target,
                                enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(alert.user_id)
        .bind(&alert.keyword)
        .bind(alert.is_regex)
        .bind(alert.case_sensitive)
        .bind(alert.channel)
        .bind(&alert.target)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.get_alert(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Alert vanished after insert"))
    }

    pub async fn get_alert(&self, alert_id: i64) -> anyhow::Result<Option<Alert>> {
        let alert = sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE id = ?")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(alert)
    }

    pub async fn get_alerts_for_user(&self, user_id: i64) -> anyhow::Result<Vec<Alert>> {
        let alerts =
            sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(alerts)
    }

    pub async fn count_alerts_for_user(&self, user_id: i64) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alerts WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn get_enabled_alerts(&self) -> anyhow::Result<Vec<Alert>> {
        let alerts =
            sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE enabled = 1 ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(alerts)
    }

    /// Only touches the alert if `user_id` owns it
    pub async fn set_alert_enabled(
        &self,
        alert_id: i64,
        user_id: i64,
        enabled: bool,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE alerts SET enabled = ? WHERE id = ? AND user_id = ?")
            .bind(enabled)
            .bind(alert_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Only deletes the alert if `user_id` owns it
    pub async fn delete_alert(&self, alert_id: i64, user_id: i64) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM alert_deliveries
            WHERE alert_id IN (SELECT id FROM alerts WHERE id = ? AND user_id = ?)
            "#,
        )
        .bind(alert_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM alerts WHERE id = ? AND user_id = ?")
            .bind(alert_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_alert_triggered(&self, alert_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE alerts SET last_triggered_at = ? WHERE id = ?")
            .bind(timestamp(Utc::now()))
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Deliveries

    /// Claim the (alert, article) pair. Returns `None` if it was already claimed.
    pub async fn record_delivery(&self, alert_id: i64, news_id: i64) -> anyhow::Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_deliveries (alert_id, news_id, status, created_at)
            VALUES (?, ?, 'pending', ?)
            ON CONFLICT(alert_id, news_id) DO NOTHING
            "#,
        )
        .bind(alert_id)
        .bind(news_id)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    pub async fn finish_delivery(
        &self,
        delivery_id: i64,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let status = if error.is_some() { "failed" } else { "sent" };
        sqlx::query("UPDATE alert_deliveries SET status = ?, error = ? WHERE id = ?")
            .bind(status)
            .bind(error)
            .bind(delivery_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_deliveries_for_alert(&self, alert_id: i64) -> anyhow::Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(
            "SELECT * FROM alert_deliveries WHERE alert_id = ? ORDER BY id DESC",
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(deliveries)
    }

    pub async fn stats(&self) -> anyhow::Result<Stats> {
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM news),
                (SELECT COUNT(*) FROM alerts),
                (SELECT COUNT(*) FROM sources),
                (SELECT COUNT(*) FROM sources WHERE enabled = 1),
                (SELECT COUNT(*) FROM alerts WHERE enabled = 1)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            total_users: row.0,
            total_news: row.1,
            total_alerts: row.2,
            total_sources: row.3,
            enabled_sources: row.4,
            active_alerts: row.5,
        })
    }
}
