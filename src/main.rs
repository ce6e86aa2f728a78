use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use quote_scrape::app_state::AppState;
use quote_scrape::config::AppConfig;
use quote_scrape::db::{self, JobStore, MemoryStore, PgStore};
use quote_scrape::routes;
use quote_scrape::services::browser::HttpBrowser;
use quote_scrape::services::images::ImageFetcher;
use quote_scrape::services::orchestrator::JobOrchestrator;
use quote_scrape::services::storage::R2Client;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let settings = config
        .scrape_settings()
        .expect("Invalid scraper configuration");

    tracing::info!("Initializing quote-scrape server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let db_pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&db_pool)
                .await
                .expect("Failed to run database migrations");

            tracing::info!("Initializing R2 storage client");
            let r2 = config.r2_settings().expect("Incomplete R2 configuration");
            let r2_client = R2Client::new(
                &r2.bucket,
                &r2.endpoint,
                &r2.access_key,
                &r2.secret_key,
                &r2.public_url,
            )
            .expect("Failed to initialize R2 client");

            Arc::new(PgStore::new(db_pool, r2_client))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs and records are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let browser = HttpBrowser::new(&settings.user_agent).expect("Failed to build HTTP client");
    let image_client = reqwest::Client::builder()
        .user_agent(settings.user_agent.as_str())
        .build()
        .expect("Failed to build image HTTP client");
    let images = ImageFetcher::new(
        image_client,
        settings.image_cache_dir.clone(),
        settings.image_timeout,
    );

    let orchestrator = JobOrchestrator::new(store, Arc::new(browser), images, settings);
    let state = AppState::new(orchestrator);

    let app = Router::new()
        .merge(routes::api_router(state))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting quote-scrape on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
