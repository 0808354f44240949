use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::alerts::AlertRule;
use crate::auth::Claims;
use crate::db::{Alert, Channel, Delivery, NewAlert, User};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    pub keyword: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_channel")]
    pub alert_type: Channel,
    pub webhook_url: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub email: Option<String>,
}

fn default_channel() -> Channel {
    Channel::Email
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlertRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    pub id: i64,
    pub keyword: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub alert_type: Channel,
    pub target: String,
    pub enabled: bool,
    pub last_triggered_at: Option<String>,
    pub created_at: String,
}

impl From<Alert> for AlertResponse {
    fn from(a: Alert) -> Self {
        Self {
            id: a.id,
            keyword: a.keyword,
            is_regex: a.is_regex,
            case_sensitive: a.case_sensitive,
            alert_type: a.channel,
            target: a.target,
            enabled: a.enabled,
            last_triggered_at: a.last_triggered_at,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub id: i64,
    pub news_id: i64,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
}

impl From<Delivery> for DeliveryResponse {
    fn from(d: Delivery) -> Self {
        Self {
            id: d.id,
            news_id: d.news_id,
            status: d.status,
            error: d.error,
            created_at: d.created_at,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Loopback, private, link-local and unspecified addresses, plus `localhost`
fn is_internal_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => internal_v4(ip),
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || ip.to_ipv4_mapped().is_some_and(internal_v4)
        }
        Err(_) => {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            host == "localhost" || host.ends_with(".localhost")
        }
    }
}

fn internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

/// Where notifications for a new alert go, checked against its channel
fn resolve_target(
    req: &CreateAlertRequest,
    owner: &User,
    allow_private_webhooks: bool,
) -> ApiResult<String> {
    match req.alert_type {
        Channel::Webhook => {
            let raw = non_blank(req.webhook_url.as_deref())
                .ok_or_else(|| ApiError::BadRequest("webhookUrl is required".to_string()))?;
            let url = Url::parse(raw)
                .map_err(|_| ApiError::BadRequest("webhookUrl is not a valid URL".to_string()))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ApiError::BadRequest(
                    "webhookUrl must use http or https".to_string(),
                ));
            }
            if !allow_private_webhooks && is_internal_host(&url) {
                return Err(ApiError::BadRequest(
                    "webhookUrl must point to a public host".to_string(),
                ));
            }
            Ok(url.to_string())
        }
        Channel::Telegram => non_blank(req.telegram_chat_id.as_deref())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("telegramChatId is required".to_string())),
        Channel::Email => {
            let email = non_blank(req.email.as_deref()).unwrap_or(&owner.email);
            if !email.contains('@') {
                return Err(ApiError::BadRequest("email is invalid".to_string()));
            }
            Ok(email.to_string())
        }
    }
}

async fn owned_alert(state: &AppState, alert_id: i64, owner: &User) -> ApiResult<Alert> {
    match state.db.get_alert(alert_id).await? {
        Some(alert) if alert.user_id == owner.id => Ok(alert),
        _ => Err(ApiError::NotFound("Alert not found".to_string())),
    }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<AlertResponse>>> {
    let user = state.user(&claims).await?;
    let alerts = state.db.get_alerts_for_user(user.id).await?;
    Ok(Json(alerts.into_iter().map(AlertResponse::from).collect()))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateAlertRequest>,
) -> ApiResult<(StatusCode, Json<AlertResponse>)> {
    let user = state.user(&claims).await?;

    AlertRule::validate(&req.keyword, req.is_regex, req.case_sensitive)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let target = resolve_target(&req, &user, state.allow_private_webhooks)?;

    let quota = state.alert_quota.for_tier(user.subscription_tier);
    if state.db.count_alerts_for_user(user.id).await? >= quota {
        return Err(ApiError::Forbidden(format!(
            "Your {} plan allows at most {} alerts",
            user.subscription_tier.as_str(),
            quota
        )));
    }

    let alert = state
        .db
        .create_alert(&NewAlert {
            user_id: user.id,
            keyword: req.keyword.trim().to_string(),
            is_regex: req.is_regex,
            case_sensitive: req.case_sensitive,
            channel: req.alert_type,
            target,
        })
        .await?;

    info!(
        "User {} created {} alert {} for '{}'",
        user.email,
        alert.channel.as_str(),
        alert.id,
        alert.keyword
    );
    Ok((StatusCode::CREATED, Json(alert.into())))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(alert_id): Path<i64>,
    Json(req): Json<UpdateAlertRequest>,
) -> ApiResult<Json<AlertResponse>> {
    let user = state.user(&claims).await?;

    if !state
        .db
        .set_alert_enabled(alert_id, user.id, req.enabled)
        .await?
    {
        return Err(ApiError::NotFound("Alert not found".to_string()));
    }

    let alert = owned_alert(&state, alert_id, &user).await?;
    Ok(Json(alert.into()))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(alert_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let user = state.user(&claims).await?;

    if !state.db.delete_alert(alert_id, user.id).await? {
        return Err(ApiError::NotFound("Alert not found".to_string()));
    }

    info!("User {} deleted alert {}", user.email, alert_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deliveries(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(alert_id): Path<i64>,
) -> ApiResult<Json<Vec<DeliveryResponse>>> {
    let user = state.user(&claims).await?;
    let alert = owned_alert(&state, alert_id, &user).await?;

    let deliveries = state.db.get_deliveries_for_alert(alert.id).await?;
    Ok(Json(deliveries.into_iter().map(DeliveryResponse::from).collect()))
}
