use axum::{routing::get, Router};
use rust_lead_distribution::config::Config;
use rust_lead_distribution::db::Database;
use rust_lead_distribution::db_storage::PgStore;
use rust_lead_distribution::engine::DistributionEngine;
use rust_lead_distribution::geocoder::{CachedGeocoder, Geocoder, PdokGeocoder};
use rust_lead_distribution::handlers::{self, AppState};
use rust_lead_distribution::notifications::{LogNotifier, Notifier, WebhookNotifier};
use rust_lead_distribution::registry::DistributionStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Sets up tracing, configuration, the database pool, the geocoder and
/// notifier, then serves the API behind rate limiting.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_distribution=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url, config.run_migrations).await?;
    tracing::info!("Database connection pool established");
    let store: Arc<dyn DistributionStore> = Arc::new(PgStore::new(db.pool.clone()));

    // Postcode lookups cached for 24h
    let geocoder: Arc<dyn Geocoder> = Arc::new(CachedGeocoder::new(PdokGeocoder::new(
        config.geocoder_base_url.clone(),
        Duration::from_millis(config.geocoder_timeout_ms),
    )?));
    tracing::info!("Geocoder initialized: {}", config.geocoder_base_url);

    let notifier: Arc<dyn Notifier> = match config.notify_webhook_url.clone() {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => {
            tracing::info!("NOTIFY_WEBHOOK_URL not set, distribution notices are logged only");
            Arc::new(LogNotifier)
        }
    };

    let engine = Arc::new(DistributionEngine::new(
        store.clone(),
        geocoder,
        notifier,
        config.engine_settings(),
    ));

    let app_state = Arc::new(AppState::new(engine, store, config.webhook_secret.clone()));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // 1MB max payload
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
