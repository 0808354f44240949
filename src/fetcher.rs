use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::alerts::{AlertDispatcher, DispatchSummary};
use crate::config::{Selectors, SourceKind};
use crate::db::{timestamp, Database, NewNews, NewsItem, Source};
use crate::parse::{self, ScrapedArticle};

pub const MAX_ITEMS_PER_SOURCE: usize = 50;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source: String,
    pub fetched: usize,
    pub inserted: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub started_at: String,
    pub finished_at: String,
    pub items_per_source: usize,
    pub sources: Vec<SourceReport>,
    pub total_inserted: usize,
    pub alerts: DispatchSummary,
}

pub struct Fetcher {
    client: Client,
    db: Arc<Database>,
    dispatcher: Arc<AlertDispatcher>,
    default_items: usize,
    crawling: Arc<RwLock<bool>>,
    last_report: RwLock<Option<CrawlReport>>,
}

impl Fetcher {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Arc<AlertDispatcher>,
        default_items: usize,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            db,
            dispatcher,
            default_items,
            crawling: Arc::new(RwLock::new(false)),
            last_report: RwLock::new(None),
        })
    }

    pub fn default_items(&self) -> usize {
        self.default_items
    }

    pub async fn is_crawling(&self) -> bool {
        *self.crawling.read().await
    }

    pub async fn last_report(&self) -> Option<CrawlReport> {
        self.last_report.read().await.clone()
    }

    /// Claim the crawl flag; false if another crawl holds it
    async fn begin(&self) -> bool {
        let mut crawling = self.crawling.write().await;
        if *crawling {
            return false;
        }
        *crawling = true;
        true
    }

    async fn finish(&self) {
        *self.crawling.write().await = false;
    }

    /// Crawl every enabled source. Returns `None` without doing anything if a
    /// crawl is already running.
    pub async fn crawl_all(&self, items_per_source: usize) -> Option<CrawlReport> {
        if !self.begin().await {
            info!("Crawl already in progress, skipping");
            return None;
        }

        let report = self.run(items_per_source).await;
        self.finish().await;
        Some(report)
    }

    /// Start a crawl in the background. Returns false if one is already running.
    pub async fn start(self: &Arc<Self>, items_per_source: usize) -> bool {
        if !self.begin().await {
            return false;
        }

        let fetcher = self.clone();
        self.spawn_crawl(async move { fetcher.run(items_per_source).await });
        true
    }

    /// Run `crawl` on its own task and release the crawl flag once it ends,
    /// even if it panicked.
    fn spawn_crawl<F>(self: &Arc<Self>, crawl: F)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let fetcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(crawl).await {
                error!("Crawl task failed: {}", e);
            }
            fetcher.finish().await;
        });
    }

    async fn run(&self, items_per_source: usize) -> CrawlReport {
        let items = items_per_source.clamp(1, MAX_ITEMS_PER_SOURCE);
        let started_at = timestamp(Utc::now());

        let sources = match self.db.get_enabled_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                error!("Failed to load sources: {}", e);
                Vec::new()
            }
        };
        info!("Crawling {} sources ({} items each)", sources.len(), items);

        let mut reports = Vec::with_capacity(sources.len());
        let mut fresh: Vec<NewsItem> = Vec::new();

        for source in &sources {
            let mut report = SourceReport {
                source: source.name.clone(),
                fetched: 0,
                inserted: 0,
                error: None,
            };

            match self.crawl_source(source, items).await {
                Ok(articles) => {
                    report.fetched = articles.len();
                    let (stored, failure) = self.store(source, articles).await;
                    report.inserted = stored.len();
                    report.error = failure.map(|e| e.to_string());
                    fresh.extend(stored);
                }
                Err(e) => report.error = Some(e.to_string()),
            }

            match &report.error {
                Some(e) => error!("Failed to crawl '{}': {}", source.name, e),
                None => info!(
                    "Crawled '{}': {} found, {} new",
                    source.name, report.fetched, report.inserted
                ),
            }
            if let Err(e) = self
                .db
                .update_source_crawled(source.id, report.error.as_deref())
                .await
            {
                warn!("Failed to record crawl of '{}': {}", source.name, e);
            }

            reports.push(report);
        }

        let alerts = match self.dispatcher.dispatch(&fresh).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Alert dispatch failed: {}", e);
                DispatchSummary::default()
            }
        };

        let report = CrawlReport {
            started_at,
            finished_at: timestamp(Utc::now()),
            items_per_source: items,
            total_inserted: fresh.len(),
            sources: reports,
            alerts,
        };
        info!("Crawl complete: {} new articles", report.total_inserted);

        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn crawl_source(&self, source: &Source, limit: usize) -> anyhow::Result<Vec<ScrapedArticle>> {
        let kind = SourceKind::parse(&source.kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown source kind '{}'", source.kind))?;

        info!("Fetching {} ({})", source.name, source.url);
        let response = self
            .client
            .get(&source.url)
            .send()
            .await?
            .error_for_status()?;

        match kind {
            SourceKind::Rss => {
                let bytes = response.bytes().await?;
                parse::parse_feed(&bytes, limit)
            }
            SourceKind::Html => {
                let html = response.text().await?;
                let selectors = Selectors {
                    item: source.item_selector.clone(),
                    title: source.title_selector.clone(),
                    description: source.description_selector.clone(),
                    image: source.image_selector.clone(),
                };
                parse::parse_html(&source.url, &html, &selectors, limit)
            }
        }
    }

    /// Insert the articles that are new. Rows already committed are returned
    /// even when a later insert fails, together with the first failure.
    async fn store(
        &self,
        source: &Source,
        articles: Vec<ScrapedArticle>,
    ) -> (Vec<NewsItem>, Option<anyhow::Error>) {
        let now = Utc::now();
        let label = source.label();
        let mut stored = Vec::new();
        let mut failure = None;

        for article in articles {
            let news = NewNews {
                source_id: Some(source.id),
                source: label.clone(),
                title: article.title,
                url: article.url,
                description: article.description,
                image_url: article.image_url,
                tags: article.tags,
                published_at: article.published_at.unwrap_or(now),
                crawled_at: now,
            };

            match self.db.insert_news_if_new(&news).await {
                Ok(Some(item)) => stored.push(item),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to store '{}': {}", news.url, e);
                    failure.get_or_insert(e);
                }
            }
        }

        (stored, failure)
    }
}

pub async fn start_background_refresh(fetcher: Arc<Fetcher>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes.max(1) * 60);
    let items = fetcher.default_items();

    info!("Starting initial crawl");
    fetcher.crawl_all(items).await;

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled crawl");
        fetcher.crawl_all(items).await;
    }
}
