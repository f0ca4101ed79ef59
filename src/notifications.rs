use crate::errors::AppError;
use crate::models::{CustomerBatch, Distribution, Lead};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Everything a customer needs to act on a delivered lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionNotice {
    pub distribution_id: Uuid,
    pub lead_id: Uuid,
    pub customer_id: Uuid,
    pub batch_id: Uuid,
    /// Delivery settings stored on the batch (webhook, email, ...).
    pub destination: serde_json::Value,
    pub vertical: String,
    pub postcode: Option<String>,
    pub name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub interests: serde_json::Value,
}

impl DistributionNotice {
    pub fn new(lead: &Lead, distribution: &Distribution, batch: Option<&CustomerBatch>) -> Self {
        Self {
            distribution_id: distribution.id,
            lead_id: lead.id,
            customer_id: distribution.customer_id,
            batch_id: distribution.batch_id,
            destination: batch
                .map(|b| b.destination.clone())
                .unwrap_or(serde_json::Value::Null),
            vertical: lead.vertical.clone(),
            postcode: lead.postcode.clone(),
            name: lead.name.clone(),
            email: lead.email.clone(),
            phone: lead.phone.clone(),
            interests: lead.interests.clone(),
        }
    }
}

/// Delivery channel for committed distributions.
///
/// Runs after the commit; a failed notice never undoes a distribution.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &DistributionNotice) -> Result<(), AppError>;
}

/// Writes notices to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &DistributionNotice) -> Result<(), AppError> {
        tracing::info!(
            "Lead {} delivered to customer {} (batch {})",
            notice.lead_id,
            notice.customer_id,
            notice.batch_id
        );
        Ok(())
    }
}

/// Posts each notice as JSON to a fixed URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create notify client: {}", e))
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: &DistributionNotice) -> Result<(), AppError> {
        tracing::debug!(
            "Posting distribution {} to {}",
            notice.distribution_id,
            self.url
        );

        let response = self
            .client
            .post(&self.url)
            .header("X-Distribution-Id", notice.distribution_id.to_string())
            .json(notice)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Notify request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Notify endpoint returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_notifier_creation() {
        assert!(WebhookNotifier::new("https://example.com/hook".to_string()).is_ok());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notice = DistributionNotice {
            distribution_id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            destination: serde_json::Value::Null,
            vertical: "solar".to_string(),
            postcode: None,
            name: None,
            email: "a@b.nl".to_string(),
            phone: None,
            interests: serde_json::json!({}),
        };
        assert!(LogNotifier.notify(&notice).await.is_ok());
    }
}
