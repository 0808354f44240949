//! Integration tests for the market-news service
//!
//! These tests drive the public library API from configuration loading
//! through storage, crawling, alert delivery and the HTTP surface.

use std::io::Write;
use tempfile::NamedTempFile;

mod common {
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }
}

#[cfg(test)]
mod config_integration_tests {
    use super::*;
    use market_news::config::{Config, SourceKind};

    #[test]
    fn test_load_shipped_sources_config() {
        let config = Config::load("sources.toml");
        assert!(config.is_ok(), "Failed to load sources.toml: {:?}", config.err());

        let config = config.unwrap();
        assert!(!config.sources.is_empty(), "sources.toml should list sources");
        assert!(config.refresh_interval > 0);
        assert!(config.sources.iter().any(|s| s.name == "CafeF"));
        assert!(config.sources.iter().any(|s| s.kind == SourceKind::Rss));
    }

    #[test]
    fn test_config_from_file_with_defaults() {
        let toml_content = r#"
            [[sources]]
            name = "CafeF"
            url = "https://cafef.vn/chung-khoan.chn"

            [[sources]]
            name = "VnExpress"
            url = "https://vnexpress.net/rss/kinh-doanh.rss"
            kind = "rss"
            enabled = false
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.refresh_interval, 5);
        assert_eq!(config.items_per_source, 15);
        assert_eq!(config.rate_limit.free, 30);
        assert_eq!(config.alerts.max_per_tier.premium, 100);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].kind, SourceKind::Html);
        assert!(config.sources[0].enabled);
        assert!(!config.sources[1].enabled);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/sources.toml").is_err());
    }
}

#[cfg(test)]
mod database_integration_tests {
    use super::common::*;
    use chrono::Utc;
    use market_news::config::Config;
    use market_news::db::{Database, NewNews, NewUser, Role, Tier};

    fn article(n: i64) -> NewNews {
        NewNews {
            source_id: None,
            source: "CAFEF".to_string(),
            title: format!("Bản tin thị trường {}", n),
            url: format!("https://cafef.vn/ban-tin-{}.chn", n),
            description: String::new(),
            image_url: None,
            tags: vec![],
            published_at: Utc::now(),
            crawled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_database_persistence() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        {
            let db = Database::new(&db_url).await.unwrap();
            db.initialize().await.unwrap();
            db.insert_news_if_new(&article(1)).await.unwrap();
            db.create_user(&NewUser {
                email: "an@example.com".to_string(),
                password_hash: "hash".to_string(),
                full_name: "An".to_string(),
                role: Role::User,
                subscription_tier: Tier::Pro,
                api_key: "key".to_string(),
            })
            .await
            .unwrap();
        }

        let db = Database::new(&db_url).await.unwrap();
        db.initialize().await.unwrap();

        assert_eq!(db.count_news().await.unwrap(), 1);
        assert!(db.insert_news_if_new(&article(1)).await.unwrap().is_none());

        let user = db.get_user_by_email("an@example.com").await.unwrap().unwrap();
        assert_eq!(user.subscription_tier, Tier::Pro);
    }

    #[tokio::test]
    async fn test_source_sync_follows_config() {
        let temp_dir = create_temp_dir();
        let db = Database::new(&create_db_path(&temp_dir)).await.unwrap();
        db.initialize().await.unwrap();

        let first = Config::from_str(
            r#"
            [[sources]]
            name = "CafeF"
            url = "https://cafef.vn/old.chn"
            "#,
        )
        .unwrap();
        db.sync_sources(&first.sources).await.unwrap();

        let second = Config::from_str(
            r#"
            [[sources]]
            name = "CafeF"
            url = "https://cafef.vn/chung-khoan.chn"

            [[sources]]
            name = "SSI"
            url = "https://www.ssi.com.vn/"
            enabled = false
            "#,
        )
        .unwrap();
        db.sync_sources(&second.sources).await.unwrap();

        let sources = db.get_all_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].url, "https://cafef.vn/chung-khoan.chn");
        assert_eq!(db.get_enabled_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_of_the_same_article() {
        let temp_dir = create_temp_dir();
        let db = Database::new(&create_db_path(&temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        let db = std::sync::Arc::new(db);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.insert_news_if_new(&article(7)).await.unwrap().is_some()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(db.count_news().await.unwrap(), 1);
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use market_news::config::Config;
    use market_news::db::Database;
    use market_news::routes::{router, AppState};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING: &str = r#"
        <html><body>
          <div class="box-category-item">
            <h3><a href="/vn-index-vuot-dinh.chn">VN-Index vượt đỉnh lịch sử</a></h3>
            <p class="sapo">Thanh khoản tăng mạnh trong phiên chiều.</p>
            <img src="/img/vnindex.jpg">
          </div>
          <div class="box-category-item">
            <h3><a href="/co-phieu-thep.chn">Cổ phiếu thép đồng loạt tăng</a></h3>
          </div>
        </body></html>
    "#;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0"><channel>
          <title>Kinh doanh</title>
          <link>https://example.vn</link>
          <description>Kinh doanh</description>
          <item>
            <title>Ngân hàng đẩy mạnh cho vay mua nhà</title>
            <link>https://example.vn/ngan-hang.html</link>
            <description>Lãi suất giảm</description>
            <category>Ngân hàng</category>
          </item>
        </channel></rss>
    "#;

    async fn request(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn build(server: &MockServer, db_url: &str) -> (Router, Arc<AppState>) {
        let config = Config::from_str(&format!(
            r#"
            [auth]
            jwt_secret = "e2e-secret"
            bcrypt_cost = 4

            [market]
            stocks_url = "{uri}/top-stocks"

            [alerts]
            allow_private_webhooks = true

            [[sources]]
            name = "CafeF"
            url = "{uri}/chung-khoan.chn"

            [[sources]]
            name = "Kinh doanh"
            url = "{uri}/rss"
            kind = "rss"
            "#,
            uri = server.uri()
        ))
        .unwrap();

        let db = Database::new(db_url).await.unwrap();
        db.initialize().await.unwrap();
        db.sync_sources(&config.sources).await.unwrap();

        let state = Arc::new(AppState::new(Arc::new(db), &config).unwrap());
        state.auth.ensure_admin().await.unwrap();
        (router(state.clone()), state)
    }

    async fn mount_sources(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/chung-khoan.chn"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_crawl_to_api_workflow() {
        let server = MockServer::start().await;
        mount_sources(&server).await;
        Mock::given(method("POST"))
            .and(path("/hooks/news"))
            .and(body_partial_json(json!({ "keyword": "ngân hàng" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let (app, state) = build(&server, &create_db_path(&temp_dir)).await;

        // Register and subscribe to a keyword before anything is crawled
        let (status, auth) = request(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "an@example.com", "password": "secret1", "fullName": "An" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = auth["token"].as_str().unwrap().to_string();

        let (status, alert) = request(
            &app,
            Method::POST,
            "/api/alerts",
            Some(&token),
            Some(json!({
                "keyword": "ngân hàng",
                "alertType": "WEBHOOK",
                "webhookUrl": format!("{}/hooks/news", server.uri()),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let alert_id = alert["id"].as_i64().unwrap();

        let report = state.fetcher.crawl_all(15).await.unwrap();
        assert_eq!(report.total_inserted, 3);
        assert_eq!(report.alerts.sent, 1);

        let (status, page) = request(&app, Method::GET, "/api/news", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["totalElements"], 3);
        let content = page["content"].as_array().unwrap();
        let vnindex = content
            .iter()
            .find(|n| n["title"] == "VN-Index vượt đỉnh lịch sử")
            .unwrap();
        assert_eq!(vnindex["source"], "CAFEF");
        assert_eq!(
            vnindex["imageUrl"],
            format!("{}/img/vnindex.jpg", server.uri())
        );
        assert_eq!(vnindex["description"], "Thanh khoản tăng mạnh trong phiên chiều.");

        let (_, by_source) =
            request(&app, Method::GET, "/api/news/source/Kinh%20doanh", None, None).await;
        assert_eq!(by_source["totalElements"], 1);
        assert_eq!(by_source["content"][0]["tags"], json!(["Ngân hàng"]));

        let (_, search) =
            request(&app, Method::GET, "/api/news/search?keyword=th%C3%A9p", None, None).await;
        assert_eq!(search["totalElements"], 1);

        let (status, deliveries) = request(
            &app,
            Method::GET,
            &format!("/api/alerts/{}/deliveries", alert_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deliveries.as_array().unwrap().len(), 1);
        assert_eq!(deliveries[0]["status"], "sent");

        // A second crawl finds nothing new and sends nothing
        let report = state.fetcher.crawl_all(15).await.unwrap();
        assert_eq!(report.total_inserted, 0);
        assert_eq!(report.alerts.matched, 0);
    }

    #[tokio::test]
    async fn test_market_data_from_live_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/top-stocks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "stockCode": "ACB", "stockName": "Ngân hàng ACB", "lastPrice": 24.1,
                      "priceChange": 0.3, "percentPriceChange": 1.26, "totalVolume": 9_870_000 }
                ]
            })))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let (app, _) = build(&server, &create_db_path(&temp_dir)).await;

        let (status, body) = request(&app, Method::GET, "/api/market/stocks", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["symbol"], "ACB");
        assert_eq!(body["data"][0]["volumeLabel"], "9.9M");
    }

    #[tokio::test]
    async fn test_admin_manages_sources_and_tiers() {
        let server = MockServer::start().await;
        mount_sources(&server).await;

        let temp_dir = create_temp_dir();
        let (app, state) = build(&server, &create_db_path(&temp_dir)).await;

        let (_, login) = request(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "admin@crawl.com", "password": "admin123" })),
        )
        .await;
        let admin = login["token"].as_str().unwrap().to_string();

        let (_, sources) = request(&app, Method::GET, "/api/admin/sources", Some(&admin), None).await;
        let rss_id = sources
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["kind"] == "rss")
            .unwrap()["id"]
            .as_i64()
            .unwrap();

        let (status, _) = request(
            &app,
            Method::PATCH,
            &format!("/api/admin/sources/{}", rss_id),
            Some(&admin),
            Some(json!({ "enabled": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let report = state.fetcher.crawl_all(15).await.unwrap();
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.total_inserted, 2);

        let (_, stats) = request(&app, Method::GET, "/api/admin/stats", Some(&admin), None).await;
        assert_eq!(stats["totalNews"], 2);
        assert_eq!(stats["enabledSources"], 1);
    }
}
