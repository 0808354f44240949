//! JSON API served to the web client.

mod admin;
mod alerts;
mod auth;
mod crawl;
mod market;
mod news;

use std::sync::Arc;

use axum::{
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
    Router,
};

use crate::alerts::AlertDispatcher;
use crate::auth::{require_auth, AuthService, Claims};
use crate::config::{AlertQuota, Config};
use crate::db::{Database, Role, User};
use crate::error::{ApiError, ApiResult};
use crate::fetcher::Fetcher;
use crate::market::MarketService;
use crate::rate_limit::CrawlRateLimiter;

pub struct AppState {
    pub db: Arc<Database>,
    pub fetcher: Arc<Fetcher>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<CrawlRateLimiter>,
    pub market: Arc<MarketService>,
    pub alert_quota: AlertQuota,
    pub allow_private_webhooks: bool,
}

impl AppState {
    /// Wire every service up from the loaded configuration
    pub fn new(db: Arc<Database>, config: &Config) -> anyhow::Result<Self> {
        let dispatcher = Arc::new(AlertDispatcher::new(db.clone(), &config.alerts)?);
        let fetcher = Arc::new(Fetcher::new(
            db.clone(),
            dispatcher,
            config.items_per_source,
        )?);

        Ok(Self {
            auth: Arc::new(AuthService::new(db.clone(), config.auth.clone())),
            rate_limiter: Arc::new(CrawlRateLimiter::new(config.rate_limit.clone())),
            market: Arc::new(MarketService::new(config.market.clone())?),
            alert_quota: config.alerts.max_per_tier.clone(),
            allow_private_webhooks: config.alerts.allow_private_webhooks,
            fetcher,
            db,
        })
    }

    /// The account behind the token, re-read so tier changes apply at once
    pub async fn user(&self, claims: &Claims) -> ApiResult<User> {
        self.auth.current_user(claims).await
    }

    pub async fn admin(&self, claims: &Claims) -> ApiResult<User> {
        let user = self.user(claims).await?;
        if user.role != Role::Admin {
            return Err(ApiError::Forbidden("Admin access required".to_string()));
        }
        Ok(user)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/news", get(news::list))
        .route("/api/news/search", get(news::search))
        .route("/api/news/source/:source", get(news::by_source))
        .route("/api/news/:id", get(news::get_one))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/market/stocks", get(market::stocks))
        .route("/api/market/bonds", get(market::bonds))
        .route("/api/market/funds", get(market::funds))
        .route("/api/market/all", get(market::all));

    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/crawl/status", get(crawl::status))
        .route("/api/crawl/user-trigger", post(crawl::user_trigger))
        .route("/api/crawl/trigger", post(crawl::admin_trigger))
        .route("/api/alerts", get(alerts::list).post(alerts::create))
        .route(
            "/api/alerts/:id",
            patch(alerts::update).delete(alerts::remove),
        )
        .route("/api/alerts/:id/deliveries", get(alerts::deliveries))
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/sources", get(admin::sources))
        .route("/api/admin/sources/:id", patch(admin::set_source_enabled))
        .route("/api/admin/users/:id/tier", put(admin::set_tier))
        .route("/api/admin/rate-limits", delete(admin::clear_rate_limits))
        .route("/api/admin/rate-limits/:user_id", delete(admin::reset_rate_limit))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_auth,
        ));

    public.merge(protected).with_state(state)
}

pub async fn health() -> impl IntoResponse {
    "OK"
}
