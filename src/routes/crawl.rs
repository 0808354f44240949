use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::AppState;
use crate::auth::Claims;
use crate::error::ApiResult;
use crate::fetcher::MAX_ITEMS_PER_SOURCE;

fn wait_message(seconds: i64) -> String {
    let minutes = (seconds + 59) / 60;
    format!("Vui lòng đợi {} phút nữa để crawl tiếp", minutes)
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state.user(&claims).await?;
    let tier = user.subscription_tier;
    let now = Utc::now();

    let can_crawl = state.rate_limiter.can_crawl(user.id, tier, now);
    let seconds = state.rate_limiter.seconds_until_next(user.id, tier, now);
    let message = if can_crawl {
        "Bạn có thể crawl ngay".to_string()
    } else {
        wait_message(seconds)
    };

    Ok(Json(json!({
        "canCrawl": can_crawl,
        "secondsUntilNext": seconds,
        "tier": tier,
        "intervalMinutes": state.rate_limiter.interval_minutes(tier),
        "crawling": state.fetcher.is_crawling().await,
        "message": message,
        "lastReport": state.fetcher.last_report().await,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerQuery {
    pub items_per_source: Option<usize>,
}

pub async fn user_trigger(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TriggerQuery>,
) -> ApiResult<Response> {
    let user = state.user(&claims).await?;
    let tier = user.subscription_tier;
    let now = Utc::now();

    if !state.rate_limiter.can_crawl(user.id, tier, now) {
        let seconds = state.rate_limiter.seconds_until_next(user.id, tier, now);
        info!("Crawl by {} rate limited for {}s", user.email, seconds);

        let body = json!({
            "status": "RATE_LIMITED",
            "message": wait_message(seconds),
            "secondsUntilNext": seconds,
            "tier": tier,
        });
        return Ok((StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response());
    }

    let items = query
        .items_per_source
        .unwrap_or_else(|| state.fetcher.default_items())
        .clamp(1, MAX_ITEMS_PER_SOURCE);

    if !state.fetcher.start(items).await {
        let body = json!({
            "status": "ALREADY_RUNNING",
            "message": "Crawl is already running",
            "tier": tier,
            "canCrawl": true,
            "secondsUntilNext": 0,
        });
        return Ok(Json(body).into_response());
    }

    state.rate_limiter.record(user.id, now);
    info!("Crawl started by {} ({})", user.email, tier.as_str());

    Ok(Json(json!({
        "status": "RUNNING",
        "message": "Crawl started",
        "tier": tier,
        "canCrawl": true,
        "secondsUntilNext": 0,
        "itemsPerSource": items,
    }))
    .into_response())
}

pub async fn admin_trigger(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<serde_json::Value>> {
    let admin = state.admin(&claims).await?;
    let items = state.fetcher.default_items();

    let (status, message) = if state.fetcher.start(items).await {
        info!("Crawl started by admin {}", admin.email);
        ("RUNNING", "Crawl started")
    } else {
        ("ALREADY_RUNNING", "Crawl is already running")
    };

    Ok(Json(json!({
        "status": status,
        "message": message,
        "itemsPerSource": items,
    })))
}
