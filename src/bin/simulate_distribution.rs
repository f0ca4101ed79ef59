//! Dry-run a distribution decision for one lead and print the report.
//!
//! Usage: simulate_distribution <lead-uuid>
//!
//! Reads the same environment as the server. Nothing is written.

use rust_lead_distribution::config::Config;
use rust_lead_distribution::db::Database;
use rust_lead_distribution::db_storage::PgStore;
use rust_lead_distribution::engine::DistributionEngine;
use rust_lead_distribution::geocoder::{CachedGeocoder, PdokGeocoder};
use rust_lead_distribution::models::DistributionMode;
use rust_lead_distribution::notifications::LogNotifier;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_distribution=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let lead_id: Uuid = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: simulate_distribution <lead-uuid>"))?
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid lead id: {}", e))?;

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url, false).await?;

    let engine = DistributionEngine::new(
        Arc::new(PgStore::new(db.pool.clone())),
        Arc::new(CachedGeocoder::new(PdokGeocoder::new(
            config.geocoder_base_url.clone(),
            Duration::from_millis(config.geocoder_timeout_ms),
        )?)),
        Arc::new(LogNotifier),
        config.engine_settings(),
    );

    let report = engine.distribute(lead_id, DistributionMode::Simulate).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
