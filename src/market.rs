//! Market snapshot for the sidebar: live HOSE top stocks from SSI iBoard,
//! with built-in snapshots for bonds, funds and for when the live feed fails.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::MarketConfig;
use crate::format::abbreviate_volume;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub volume_label: String,
}

impl Quote {
    pub fn new(symbol: &str, name: &str, price: f64, change: f64, change_percent: f64, volume: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            price,
            change,
            change_percent,
            volume,
            volume_label: abbreviate_volume(volume),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopStocksResponse {
    #[serde(default)]
    data: Vec<TopStock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopStock {
    #[serde(default)]
    stock_code: Option<String>,
    #[serde(default)]
    stock_name: Option<String>,
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    price_change: Option<f64>,
    #[serde(default)]
    percent_price_change: Option<f64>,
    #[serde(default)]
    total_volume: Option<f64>,
}

impl From<TopStock> for Quote {
    fn from(s: TopStock) -> Self {
        Quote::new(
            s.stock_code.as_deref().unwrap_or_default(),
            s.stock_name.as_deref().unwrap_or_default(),
            s.last_price.unwrap_or(0.0),
            s.price_change.unwrap_or(0.0),
            s.percent_price_change.unwrap_or(0.0),
            s.total_volume.unwrap_or(0.0).max(0.0) as u64,
        )
    }
}

pub fn fallback_stocks() -> Vec<Quote> {
    vec![
        Quote::new("VNM", "Vinamilk", 78.5, 1.2, 1.55, 2_450_000),
        Quote::new("VIC", "Vingroup", 45.3, -0.8, -1.73, 5_680_000),
        Quote::new("HPG", "Hòa Phát", 28.9, 0.5, 1.76, 8_920_000),
        Quote::new("VHM", "Vinhomes", 62.1, -1.2, -1.90, 3_450_000),
        Quote::new("TCB", "Techcombank", 52.8, 0.9, 1.73, 4_230_000),
        Quote::new("VPB", "VPBank", 18.4, 0.3, 1.66, 6_780_000),
        Quote::new("MSN", "Masan", 89.2, -2.1, -2.30, 1_890_000),
        Quote::new("FPT", "FPT Corp", 125.5, 3.5, 2.87, 2_340_000),
    ]
}

pub fn bonds() -> Vec<Quote> {
    vec![
        Quote::new("BOND001", "TP Chính phủ 5Y", 102.5, 0.2, 0.20, 150_000),
        Quote::new("BOND002", "TP Chính phủ 10Y", 105.8, -0.1, -0.09, 230_000),
        Quote::new("BOND003", "TP Doanh nghiệp VNM", 98.3, 0.5, 0.51, 89_000),
        Quote::new("BOND004", "TP Doanh nghiệp VIC", 96.7, -0.3, -0.31, 120_000),
        Quote::new("BOND005", "TP Chính phủ 3Y", 101.2, 0.1, 0.10, 180_000),
    ]
}

pub fn funds() -> Vec<Quote> {
    vec![
        Quote::new("DCDS", "Quỹ DCDS", 15.8, 0.2, 1.28, 450_000),
        Quote::new("DCBC", "Quỹ DCBC", 12.3, -0.1, -0.81, 320_000),
        Quote::new("VFMVN30", "Quỹ VFM VN30", 18.9, 0.4, 2.16, 580_000),
        Quote::new("SSISCA", "Quỹ SSI SCA", 14.5, 0.3, 2.11, 290_000),
        Quote::new("VESAF", "Quỹ VESAF", 16.2, -0.2, -1.22, 410_000),
    ]
}

pub struct MarketService {
    client: Client,
    config: MarketConfig,
    cache: RwLock<Option<(Instant, Vec<Quote>)>>,
}

impl MarketService {
    pub fn new(config: MarketConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;

        Ok(Self {
            client,
            config,
            cache: RwLock::new(None),
        })
    }

    /// Top stocks by traded value. Never fails: falls back to a fixed snapshot.
    pub async fn stocks(&self) -> Vec<Quote> {
        let ttl = Duration::from_secs(self.config.cache_seconds);
        if let Some((fetched_at, quotes)) = self.cache.read().await.as_ref() {
            if fetched_at.elapsed() < ttl {
                return quotes.clone();
            }
        }

        match self.fetch_stocks().await {
            Ok(quotes) if !quotes.is_empty() => {
                info!("Fetched {} stocks from market feed", quotes.len());
                *self.cache.write().await = Some((Instant::now(), quotes.clone()));
                quotes
            }
            Ok(_) => {
                warn!("Market feed returned no stocks, using fallback snapshot");
                fallback_stocks()
            }
            Err(e) => {
                warn!("Market feed failed, using fallback snapshot: {}", e);
                fallback_stocks()
            }
        }
    }

    async fn fetch_stocks(&self) -> anyhow::Result<Vec<Quote>> {
        let response: TopStocksResponse = self
            .client
            .get(&self.config.stocks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .data
            .into_iter()
            .take(self.config.max_stocks)
            .map(Quote::from)
            .collect())
    }
}
