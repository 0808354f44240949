//! Keyword alerts: matching freshly crawled articles against user rules and
//! delivering notifications over webhook, Telegram or an email relay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AlertsConfig;
use crate::db::{Alert, Channel, Database, NewsItem};

const MAX_KEYWORD_LEN: usize = 200;

enum Pattern {
    Keyword { needle: String, case_sensitive: bool },
    Regex(Regex),
}

/// A compiled alert, ready to test articles against
pub struct AlertRule {
    pub alert: Alert,
    pattern: Pattern,
}

impl AlertRule {
    pub fn compile(alert: Alert) -> anyhow::Result<Self> {
        let pattern = build_pattern(&alert.keyword, alert.is_regex, alert.case_sensitive)?;
        Ok(Self { alert, pattern })
    }

    /// Check a keyword before it is stored
    pub fn validate(keyword: &str, is_regex: bool, case_sensitive: bool) -> anyhow::Result<()> {
        build_pattern(keyword, is_regex, case_sensitive).map(|_| ())
    }

    pub fn matches(&self, title: &str, description: &str) -> bool {
        let haystack = format!("{}\n{}", title, description);
        match &self.pattern {
            Pattern::Regex(re) => re.is_match(&haystack),
            Pattern::Keyword {
                needle,
                case_sensitive: true,
            } => haystack.contains(needle.as_str()),
            Pattern::Keyword {
                needle,
                case_sensitive: false,
            } => haystack.to_lowercase().contains(needle.as_str()),
        }
    }
}

fn build_pattern(keyword: &str, is_regex: bool, case_sensitive: bool) -> anyhow::Result<Pattern> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        anyhow::bail!("Keyword must not be empty");
    }
    if keyword.chars().count() > MAX_KEYWORD_LEN {
        anyhow::bail!("Keyword must be at most {} characters", MAX_KEYWORD_LEN);
    }

    if is_regex {
        let re = RegexBuilder::new(keyword)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid regex: {}", e))?;
        return Ok(Pattern::Regex(re));
    }

    let needle = if case_sensitive {
        keyword.to_string()
    } else {
        keyword.to_lowercase()
    };
    Ok(Pattern::Keyword {
        needle,
        case_sensitive,
    })
}

/// What gets sent when an article trips an alert
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMessage {
    pub alert_id: i64,
    pub keyword: String,
    pub news_id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: String,
}

impl AlertMessage {
    pub fn new(alert: &Alert, news: &NewsItem) -> Self {
        Self {
            alert_id: alert.id,
            keyword: alert.keyword.clone(),
            news_id: news.id,
            title: news.title.clone(),
            url: news.url.clone(),
            source: news.source.clone(),
            published_at: news.published_at.clone(),
        }
    }

    pub fn subject(&self) -> String {
        format!("[{}] {}", self.keyword, self.title)
    }

    pub fn text(&self) -> String {
        format!(
            "🔔 {}\n{}\nNguồn: {}\n{}",
            self.keyword, self.title, self.source, self.url
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, target: &str, message: &AlertMessage) -> anyhow::Result<()>;
}

fn notifier_client() -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent("MarketNews/1.0 (Alerts)")
        .build()?)
}

/// POSTs the message as JSON to the alert's URL
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, target: &str, message: &AlertMessage) -> anyhow::Result<()> {
        self.client
            .post(target)
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Sends through the Telegram Bot API; the alert target is the chat id
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
}

impl TelegramNotifier {
    pub fn new(client: Client, api_base: &str, bot_token: Option<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, target: &str, message: &AlertMessage) -> anyhow::Result<()> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Telegram bot token is not configured"))?;

        // The token is part of the URL; keep it out of the error text
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        self.client
            .post(url)
            .json(&json!({ "chat_id": target, "text": message.text() }))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| anyhow::anyhow!("Telegram API error: {}", e.without_url()))?;
        Ok(())
    }
}

/// Hands the mail to an HTTP relay; the alert target is the recipient address
pub struct EmailNotifier {
    client: Client,
    relay_url: Option<String>,
}

impl EmailNotifier {
    pub fn new(client: Client, relay_url: Option<String>) -> Self {
        Self { client, relay_url }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn deliver(&self, target: &str, message: &AlertMessage) -> anyhow::Result<()> {
        let relay = self
            .relay_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Email relay is not configured"))?;

        self.client
            .post(relay)
            .json(&json!({
                "to": target,
                "subject": message.subject(),
                "body": message.text(),
            }))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| anyhow::anyhow!("Email relay error: {}", e.without_url()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub matched: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct AlertDispatcher {
    db: Arc<Database>,
    webhook: Arc<dyn Notifier>,
    telegram: Arc<dyn Notifier>,
    email: Arc<dyn Notifier>,
}

impl AlertDispatcher {
    pub fn new(db: Arc<Database>, config: &AlertsConfig) -> anyhow::Result<Self> {
        let client = notifier_client()?;
        Ok(Self::with_notifiers(
            db,
            Arc::new(WebhookNotifier::new(client.clone())),
            Arc::new(TelegramNotifier::new(
                client.clone(),
                &config.telegram_api_base,
                config.telegram_bot_token.clone(),
            )),
            Arc::new(EmailNotifier::new(client, config.email_relay_url.clone())),
        ))
    }

    pub fn with_notifiers(
        db: Arc<Database>,
        webhook: Arc<dyn Notifier>,
        telegram: Arc<dyn Notifier>,
        email: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            webhook,
            telegram,
            email,
        }
    }

    fn notifier_for(&self, channel: Channel) -> &dyn Notifier {
        match channel {
            Channel::Webhook => self.webhook.as_ref(),
            Channel::Telegram => self.telegram.as_ref(),
            Channel::Email => self.email.as_ref(),
        }
    }

    /// Match every enabled alert against `news` and deliver each match once
    pub async fn dispatch(&self, news: &[NewsItem]) -> anyhow::Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        if news.is_empty() {
            return Ok(summary);
        }

        let rules: Vec<AlertRule> = self
            .db
            .get_enabled_alerts()
            .await?
            .into_iter()
            .filter_map(|alert| {
                let id = alert.id;
                AlertRule::compile(alert)
                    .map_err(|e| warn!("Skipping alert {}: {}", id, e))
                    .ok()
            })
            .collect();

        for rule in &rules {
            let mut triggered = false;

            for item in news.iter().filter(|n| rule.matches(&n.title, &n.description)) {
                let Some(delivery_id) = self.db.record_delivery(rule.alert.id, item.id).await?
                else {
                    continue;
                };

                summary.matched += 1;
                triggered = true;

                let message = AlertMessage::new(&rule.alert, item);
                let outcome = self
                    .notifier_for(rule.alert.channel)
                    .deliver(&rule.alert.target, &message)
                    .await;

                match outcome {
                    Ok(()) => {
                        summary.sent += 1;
                        self.db.finish_delivery(delivery_id, None).await?;
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!(
                            "Alert {} ({}) delivery failed for news {}: {}",
                            rule.alert.id,
                            rule.alert.channel.as_str(),
                            item.id,
                            e
                        );
                        self.db
                            .finish_delivery(delivery_id, Some(&e.to_string()))
                            .await?;
                    }
                }
            }

            if triggered {
                self.db.mark_alert_triggered(rule.alert.id).await?;
            }
        }

        if summary.matched > 0 {
            info!(
                "Alerts: {} matched, {} sent, {} failed",
                summary.matched, summary.sent, summary.failed
            );
        }
        Ok(summary)
    }
}
