use crate::errors::{AppError, ResultExt};
use crate::handlers::AppState;
use crate::leads::validate_submission;
use crate::models::DistributionMode;
use crate::ranking::DistributionOutcome;
use crate::webhook_models::{CampaignLeadEvent, WebhookLeadResult, WebhookPayload, WebhookResponse};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

/// Campaign webhook handler
///
/// Receives leads from ad/form campaigns, ingests each one and runs a
/// committed distribution for it. One bad lead never fails the whole call.
///
/// Expected payload: single lead object OR array of leads
/// Authentication: X-Webhook-Token header must match WEBHOOK_SECRET env var
pub async fn campaign_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    tracing::info!("Received campaign webhook");

    validate_webhook_secret(&state, &headers)?;

    let events = payload.into_events();
    let total_received = events.len();
    tracing::info!("Processing {} campaign lead(s)", total_received);

    let mut processed = 0;
    let mut duplicates = 0;
    let mut failed = 0;
    let mut results = Vec::with_capacity(total_received);

    for event in events {
        let email = event.lead.email.clone();
        match process_event(&state, event).await {
            Ok(ProcessResult::Processed(result)) => {
                processed += 1;
                results.push(result);
            }
            Ok(ProcessResult::Duplicate) => {
                duplicates += 1;
                tracing::debug!("Skipped duplicate campaign lead");
            }
            Err(e) => {
                tracing::error!("Failed to process campaign lead: {}", e);
                failed += 1;
                results.push(WebhookLeadResult {
                    email,
                    lead_id: None,
                    outcome: None,
                    distributions: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    tracing::info!(
        "Webhook processing complete: {} received, {} processed, {} duplicates, {} failed",
        total_received,
        processed,
        duplicates,
        failed
    );

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            status: "received".to_string(),
            received: total_received,
            processed,
            duplicates,
            failed,
            results,
        }),
    ))
}

/// Validate webhook secret from X-Webhook-Token header
fn validate_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    // No secret configured: open (warned at startup)
    let Some(ref expected_secret) = state.webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get("X-Webhook-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Webhook-Token header".to_string()))?;

    if !constant_time_compare(token, expected_secret) {
        tracing::warn!("Invalid webhook token received");
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[derive(Debug)]
enum ProcessResult {
    Processed(WebhookLeadResult),
    Duplicate,
}

async fn process_event(
    state: &AppState,
    event: CampaignLeadEvent,
) -> Result<ProcessResult, AppError> {
    let new_lead = validate_submission(&event.lead)?;

    let key = event.dedup_key(&new_lead.email);
    if state.recent_submissions.contains_key(&key) {
        return Ok(ProcessResult::Duplicate);
    }

    let lead = state
        .store
        .upsert_lead(&new_lead)
        .await
        .with_context(|| format!("Failed to store campaign lead {}", new_lead.email))?;

    let report = state
        .engine
        .distribute_lead(lead.clone(), DistributionMode::Commit)
        .await?;

    // Only a completed decision suppresses redelivery
    state.recent_submissions.insert(key, lead.id).await;

    if report.outcome != DistributionOutcome::Distributed {
        tracing::info!(
            "Campaign lead {} not distributed: {:?}",
            lead.id,
            report.outcome
        );
    }

    Ok(ProcessResult::Processed(WebhookLeadResult {
        email: Some(lead.email),
        lead_id: Some(lead.id),
        outcome: Some(report.outcome),
        distributions: report.distributions.len(),
        error: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secret2"));
        assert!(!constant_time_compare("", "x"));
    }
}
