use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Serialize;

use super::AppState;
use crate::auth::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use crate::db::{Role, Tier};
use crate::error::ApiResult;

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    Ok(Json(state.auth.register(req).await?))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    Ok(Json(state.auth.login(req).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub subscription_tier: Tier,
    pub api_key: String,
    pub created_at: String,
    pub crawl_interval_minutes: i64,
    pub alert_quota: i64,
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state.user(&claims).await?;
    let tier = user.subscription_tier;

    Ok(Json(ProfileResponse {
        id: user.id,
        email: user.email,
        full_name: user.full_name,
        role: user.role,
        subscription_tier: tier,
        api_key: user.api_key,
        created_at: user.created_at,
        crawl_interval_minutes: state.rate_limiter.interval_minutes(tier),
        alert_quota: state.alert_quota.for_tier(tier),
    }))
}
