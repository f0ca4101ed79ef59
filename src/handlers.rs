use crate::engine::{DistributionEngine, DistributionReport};
use crate::errors::{AppError, ResultExt};
use crate::leads::{validate_submission, LeadSubmission};
use crate::models::{CustomerBatch, Distribution, DistributionMode, Lead};
use crate::registry::{capacity_summary, DistributionStore};
use crate::webhook_handler;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DistributionEngine>,
    pub store: Arc<dyn DistributionStore>,
    /// Expected X-Webhook-Token. `None` disables the check.
    pub webhook_secret: Option<String>,
    /// Campaign submissions seen recently, keyed "campaign:email".
    /// Providers retry deliveries; a repeat inside the window is skipped.
    pub recent_submissions: Cache<String, Uuid>,
}

impl AppState {
    pub fn new(
        engine: Arc<DistributionEngine>,
        store: Arc<dyn DistributionStore>,
        webhook_secret: Option<String>,
    ) -> Self {
        // 5 minute TTL covers provider retry windows
        let recent_submissions = Cache::builder()
            .time_to_live(Duration::from_secs(300))
            .max_capacity(10_000)
            .build();

        Self {
            engine,
            store,
            webhook_secret,
            recent_submissions,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ModeQuery {
    #[serde(default)]
    pub mode: DistributionMode,
}

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub vertical: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeadIntakeResponse {
    pub lead: Lead,
    pub report: DistributionReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchListing {
    pub vertical: String,
    pub total: usize,
    pub with_capacity: usize,
    pub batches: Vec<CustomerBatch>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-lead-distribution",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/leads?mode=commit|simulate
///
/// Validates and upserts the lead, then runs a distribution decision for it.
/// In simulate mode the lead is still stored; only the distribution is dry.
pub async fn submit_lead(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModeQuery>,
    Json(submission): Json<LeadSubmission>,
) -> Result<(StatusCode, Json<LeadIntakeResponse>), AppError> {
    let new_lead = validate_submission(&submission)?;
    tracing::info!(
        "POST /leads - {} lead for vertical '{}'",
        query.mode.as_str(),
        new_lead.vertical
    );

    let lead = state
        .store
        .upsert_lead(&new_lead)
        .await
        .context("Failed to store lead")?;

    let report = state.engine.distribute_lead(lead.clone(), query.mode).await?;

    Ok((StatusCode::CREATED, Json(LeadIntakeResponse { lead, report })))
}

/// POST /api/v1/leads/:id/distribute?mode=commit|simulate
pub async fn distribute_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ModeQuery>,
) -> Result<Json<DistributionReport>, AppError> {
    tracing::info!("POST /leads/{}/distribute - mode {}", id, query.mode.as_str());
    let report = state.engine.distribute(id, query.mode).await?;
    Ok(Json(report))
}

/// GET /api/v1/leads/:id/distributions
pub async fn list_distributions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Distribution>>, AppError> {
    state
        .store
        .get_lead(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

    let distributions = state.store.distributions_for_lead(id).await?;
    Ok(Json(distributions))
}

/// GET /api/v1/batches?vertical=solar
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BatchQuery>,
) -> Result<Json<BatchListing>, AppError> {
    let vertical = query
        .vertical
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest("vertical query parameter is required".to_string()))?;

    let batches = state.store.active_batches(&vertical).await?;
    let (total, with_capacity) = capacity_summary(&batches);

    Ok(Json(BatchListing {
        vertical,
        total,
        with_capacity,
        batches,
    }))
}

/// API routes, without state or outer layers.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/leads", post(submit_lead))
        .route("/api/v1/leads/:id/distribute", post(distribute_lead))
        .route("/api/v1/leads/:id/distributions", get(list_distributions))
        .route("/api/v1/batches", get(list_batches))
        .route(
            "/api/v1/webhooks/leads",
            post(webhook_handler::campaign_webhook),
        )
}

/// Complete router with health check. Rate limiting is added by the server.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}
