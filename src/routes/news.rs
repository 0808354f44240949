use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::db::{parse_timestamp, NewsItem};
use crate::error::{ApiError, ApiResult};
use crate::format::{relative_time, Page, PageRequest, DEFAULT_PAGE_SIZE};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsResponse {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    pub description: String,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    pub published_at: String,
    pub crawled_at: String,
    pub published_ago: String,
}

impl NewsResponse {
    fn new(item: NewsItem, now: DateTime<Utc>) -> Self {
        let published_ago = parse_timestamp(&item.published_at)
            .map(|then| relative_time(then, now))
            .unwrap_or_default();

        Self {
            tags: item.tag_list(),
            id: item.id,
            title: item.title,
            url: item.url,
            source: item.source,
            description: item.description,
            image_url: item.image_url,
            published_at: item.published_at,
            crawled_at: item.crawled_at,
            published_ago,
        }
    }
}

fn to_page(items: Vec<NewsItem>, page: i64, size: i64, total: i64) -> Page<NewsResponse> {
    let now = Utc::now();
    Page::new(items, page, size, total).map(|item| NewsResponse::new(item, now))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(req): Query<PageRequest>,
) -> ApiResult<Json<Page<NewsResponse>>> {
    let total = state.db.count_news().await?;
    let (page, offset) = req.resolve(total);
    let items = state.db.get_news_page(req.size(), offset).await?;

    Ok(Json(to_page(items, page, req.size(), total)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Page<NewsResponse>>> {
    let keyword = query.keyword.as_deref().map(str::trim).unwrap_or_default();
    if keyword.is_empty() {
        return Err(ApiError::BadRequest("Keyword is required".to_string()));
    }

    let req = PageRequest {
        page: query.page,
        size: query.size,
    };
    let total = state.db.count_search(keyword).await?;
    let (page, offset) = req.resolve(total);
    let items = state.db.search_news(keyword, req.size(), offset).await?;

    Ok(Json(to_page(items, page, req.size(), total)))
}

pub async fn by_source(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    Query(req): Query<PageRequest>,
) -> ApiResult<Json<Page<NewsResponse>>> {
    let total = state.db.count_by_source(&source).await?;
    let (page, offset) = req.resolve(total);
    let items = state
        .db
        .get_news_by_source(&source, req.size(), offset)
        .await?;

    Ok(Json(to_page(items, page, req.size(), total)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<NewsResponse>> {
    let item = state
        .db
        .get_news(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("News not found".to_string()))?;

    Ok(Json(NewsResponse::new(item, Utc::now())))
}
