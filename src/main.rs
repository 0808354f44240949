use std::sync::Arc;

use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use market_news::config::Config;
use market_news::db::Database;
use market_news::fetcher::start_background_refresh;
use market_news::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("MARKET_NEWS_CONFIG").unwrap_or_else(|_| "sources.toml".to_string());
    let mut config = Config::load(&config_path)?;
    config.apply_env();
    info!(
        "Loaded {} sources from {}",
        config.sources.len(),
        config_path
    );

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:market_news.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_sources(&config.sources).await?;
    info!("Database initialized");

    let state = Arc::new(AppState::new(Arc::new(db), &config)?);
    state.auth.ensure_admin().await?;

    // Start background crawl task
    let bg_fetcher = state.fetcher.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_fetcher, refresh_interval).await;
    });

    let mut app = routes::router(state);
    if let Some(dir) = &config.static_dir {
        info!("Serving web client from {}", dir);
        app = app.fallback_service(ServeDir::new(dir));
    }
    let app = app
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
