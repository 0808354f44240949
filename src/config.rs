use serde::Deserialize;
use std::path::Path;

use crate::db::Tier;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Crawl interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Articles taken from each source per crawl
    #[serde(default = "default_items_per_source")]
    pub items_per_source: usize,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Directory holding a built SPA bundle, served as the fallback route
    #[serde(default)]
    pub static_dir: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    pub sources: Vec<SourceConfig>,
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_items_per_source() -> usize {
    15
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            admin_email: default_admin_email(),
            admin_password: default_admin_password(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_jwt_secret() -> String {
    "change-me-market-news-secret".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_admin_email() -> String {
    "admin@crawl.com".to_string()
}

fn default_admin_password() -> String {
    "admin123".to_string()
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

/// Minutes a user must wait between self-service crawls, per tier
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_free_minutes")]
    pub free: i64,
    #[serde(default = "default_pro_minutes")]
    pub pro: i64,
    #[serde(default = "default_premium_minutes")]
    pub premium: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            free: default_free_minutes(),
            pro: default_pro_minutes(),
            premium: default_premium_minutes(),
        }
    }
}

fn default_free_minutes() -> i64 {
    30
}

fn default_pro_minutes() -> i64 {
    5
}

fn default_premium_minutes() -> i64 {
    1
}

impl RateLimitConfig {
    pub fn interval_minutes(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Premium => self.premium,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    #[serde(default = "default_stocks_url")]
    pub stocks_url: String,
    #[serde(default = "default_max_stocks")]
    pub max_stocks: usize,
    #[serde(default = "default_cache_seconds")]
    pub cache_seconds: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            stocks_url: default_stocks_url(),
            max_stocks: default_max_stocks(),
            cache_seconds: default_cache_seconds(),
        }
    }
}

fn default_stocks_url() -> String {
    "https://iboard-api.ssi.com.vn/statistics/charts/top-stocks?language=vi&lookupRequest.market=HOSE&lookupRequest.type=VALUE&lookupRequest.order=DESC".to_string()
}

fn default_max_stocks() -> usize {
    8
}

fn default_cache_seconds() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub email_relay_url: Option<String>,
    /// Let webhooks target loopback and private-network hosts
    #[serde(default)]
    pub allow_private_webhooks: bool,
    #[serde(default)]
    pub max_per_tier: AlertQuota,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram_api_base: default_telegram_api_base(),
            telegram_bot_token: None,
            email_relay_url: None,
            allow_private_webhooks: false,
            max_per_tier: AlertQuota::default(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertQuota {
    #[serde(default = "default_free_alerts")]
    pub free: i64,
    #[serde(default = "default_pro_alerts")]
    pub pro: i64,
    #[serde(default = "default_premium_alerts")]
    pub premium: i64,
}

impl Default for AlertQuota {
    fn default() -> Self {
        Self {
            free: default_free_alerts(),
            pro: default_pro_alerts(),
            premium: default_premium_alerts(),
        }
    }
}

fn default_free_alerts() -> i64 {
    3
}

fn default_pro_alerts() -> i64 {
    20
}

fn default_premium_alerts() -> i64 {
    100
}

impl AlertQuota {
    pub fn for_tier(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Premium => self.premium,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Html,
    Rss,
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Html
    }
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Html => "html",
            SourceKind::Rss => "rss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Some(SourceKind::Html),
            "rss" => Some(SourceKind::Rss),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub item_selector: Option<String>,
    #[serde(default)]
    pub title_selector: Option<String>,
    #[serde(default)]
    pub description_selector: Option<String>,
    #[serde(default)]
    pub image_selector: Option<String>,
}

fn default_enabled() -> bool {
    true
}

pub const DEFAULT_ITEM_SELECTOR: &str =
    "article, .item-news, .box-category-item, .list-news-subfolder li, .news-item, .box-news li, .list-news li";
pub const DEFAULT_TITLE_SELECTOR: &str = "h3 a, h2 a, h4 a, .title a, a[title]";
pub const DEFAULT_DESCRIPTION_SELECTOR: &str = ".sapo, .description, .summary, p";
pub const DEFAULT_IMAGE_SELECTOR: &str = "img";

/// CSS selectors used to pull articles out of an HTML listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selectors {
    pub item: String,
    pub title: String,
    pub description: String,
    pub image: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            item: DEFAULT_ITEM_SELECTOR.to_string(),
            title: DEFAULT_TITLE_SELECTOR.to_string(),
            description: DEFAULT_DESCRIPTION_SELECTOR.to_string(),
            image: DEFAULT_IMAGE_SELECTOR.to_string(),
        }
    }
}

impl SourceConfig {
    pub fn selectors(&self) -> Selectors {
        let pick = |value: &Option<String>, fallback: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        Selectors {
            item: pick(&self.item_selector, DEFAULT_ITEM_SELECTOR),
            title: pick(&self.title_selector, DEFAULT_TITLE_SELECTOR),
            description: pick(&self.description_selector, DEFAULT_DESCRIPTION_SELECTOR),
            image: pick(&self.image_selector, DEFAULT_IMAGE_SELECTOR),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `JWT_SECRET` and `BIND_ADDRESS` overrides from the environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("JWT_SECRET").ok(),
            std::env::var("BIND_ADDRESS").ok(),
        );
    }

    fn apply_overrides(&mut self, jwt_secret: Option<String>, bind_address: Option<String>) {
        if let Some(secret) = jwt_secret.filter(|s| !s.is_empty()) {
            self.auth.jwt_secret = secret;
        }
        if let Some(addr) = bind_address.filter(|s| !s.is_empty()) {
            self.bind_address = addr;
        }
    }
}
