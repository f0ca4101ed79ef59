use crate::leads::LeadSubmission;
use crate::ranking::DistributionOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Campaign webhook body - single lead or array of leads
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Batch(Vec<CampaignLeadEvent>),
    Single(CampaignLeadEvent),
}

impl WebhookPayload {
    /// Convert to a vec of events for uniform processing
    pub fn into_events(self) -> Vec<CampaignLeadEvent> {
        match self {
            WebhookPayload::Single(event) => vec![event],
            WebhookPayload::Batch(events) => events,
        }
    }
}

/// One lead captured by an ad or form campaign.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CampaignLeadEvent {
    /// Campaign / form that produced the lead
    #[serde(default)]
    pub campaign_id: Option<String>,

    #[serde(flatten)]
    pub lead: LeadSubmission,
}

impl CampaignLeadEvent {
    /// Dedup key. Falls back to "-" when the provider sends no campaign.
    pub fn dedup_key(&self, email: &str) -> String {
        format!("{}:{}", self.campaign_id.as_deref().unwrap_or("-"), email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLeadResult {
    pub email: Option<String>,
    pub lead_id: Option<Uuid>,
    pub outcome: Option<DistributionOutcome>,
    pub distributions: usize,
    pub error: Option<String>,
}

/// Webhook response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    pub received: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub results: Vec<WebhookLeadResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_event_with_aliases() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "campaign_id": "zonnepanelen-q3",
            "email": "jan@example.nl",
            "branch": "solar",
            "postal_code": "8011 AA",
            "interests": {"roof": "flat"}
        }))
        .unwrap();

        let events = payload.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].campaign_id.as_deref(), Some("zonnepanelen-q3"));
        assert_eq!(events[0].lead.vertical.as_deref(), Some("solar"));
        assert_eq!(events[0].lead.postcode.as_deref(), Some("8011 AA"));
        assert_eq!(
            events[0].dedup_key("jan@example.nl"),
            "zonnepanelen-q3:jan@example.nl"
        );
    }

    #[test]
    fn test_batch_event() {
        let payload: WebhookPayload = serde_json::from_value(json!([
            {"email": "a@example.nl", "vertical": "solar"},
            {"email": "b@example.nl", "vertical": "solar"}
        ]))
        .unwrap();

        let events = payload.into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].dedup_key("b@example.nl"), "-:b@example.nl");
    }
}
