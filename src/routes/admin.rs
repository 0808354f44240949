use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::AppState;
use crate::auth::Claims;
use crate::db::{Source, Stats, Tier};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub kind: String,
    pub enabled: bool,
    pub last_crawled: Option<String>,
    pub last_error: Option<String>,
}

impl From<Source> for SourceResponse {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            name: s.name,
            url: s.url,
            kind: s.kind,
            enabled: s.enabled,
            last_crawled: s.last_crawled,
            last_error: s.last_error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceToggle {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct TierChange {
    pub tier: Tier,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Stats>> {
    state.admin(&claims).await?;
    Ok(Json(state.db.stats().await?))
}

pub async fn sources(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<SourceResponse>>> {
    state.admin(&claims).await?;
    let sources = state.db.get_all_sources().await?;
    Ok(Json(sources.into_iter().map(SourceResponse::from).collect()))
}

pub async fn set_source_enabled(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(source_id): Path<i64>,
    Json(req): Json<SourceToggle>,
) -> ApiResult<Json<SourceResponse>> {
    let admin = state.admin(&claims).await?;

    if !state.db.set_source_enabled(source_id, req.enabled).await? {
        return Err(ApiError::NotFound("Source not found".to_string()));
    }
    let source = state
        .db
        .get_source(source_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Source not found".to_string()))?;

    info!(
        "Admin {} set source '{}' enabled={}",
        admin.email, source.name, req.enabled
    );
    Ok(Json(source.into()))
}

pub async fn set_tier(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
    Json(req): Json<TierChange>,
) -> ApiResult<Json<serde_json::Value>> {
    let admin = state.admin(&claims).await?;

    if !state.db.set_subscription_tier(user_id, req.tier).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    let user = state
        .db
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    info!(
        "Admin {} moved {} to {}",
        admin.email,
        user.email,
        req.tier.as_str()
    );
    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "subscriptionTier": user.subscription_tier,
    })))
}

pub async fn reset_rate_limit(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.admin(&claims).await?;
    let reset = state.rate_limiter.reset(user_id);
    Ok(Json(json!({ "userId": user_id, "reset": reset })))
}

pub async fn clear_rate_limits(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<serde_json::Value>> {
    state.admin(&claims).await?;
    let cleared = state.rate_limiter.clear();
    info!("Cleared {} crawl cooldowns", cleared);
    Ok(Json(json!({ "cleared": cleared })))
}
