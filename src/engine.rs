//! The distribution pipeline.
//!
//! lead -> geocode -> active batches -> evaluate -> rank/select -> commit
//!
//! Simulation runs the exact same code with a [`DryRunCommitter`] and skips
//! every write (coordinates included) and every notification.

use crate::committer::{
    commit_selection, CommitPlan, CommitPolicy, DroppedCandidate, DryRunCommitter, LiveCommitter,
    SlotClaimer,
};
use crate::eligibility::{Evaluator, LeadProfile, RegionMatching};
use crate::errors::{AppError, ResultExt};
use crate::geo::Coordinates;
use crate::geocoder::{GeocodeError, GeocodeOutcome, Geocoder};
use crate::models::{Candidate, CustomerBatch, Distribution, DistributionMode, Lead};
use crate::notifications::{DistributionNotice, Notifier};
use crate::ranking::{pre_selection_outcome, select, DistributionOutcome};
use crate::registry::{capacity_summary, DistributionStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Lifetime cap on distributions per lead (K).
    pub max_recipients_per_lead: usize,
    pub geocode_timeout: Duration,
    pub region_matching: RegionMatching,
    pub commit: CommitPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_recipients_per_lead: 2,
            geocode_timeout: Duration::from_secs(3),
            region_matching: RegionMatching::default(),
            commit: CommitPolicy::default(),
        }
    }
}

/// How the lead's coordinates were obtained for this decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeStatus {
    /// Coordinates were already stored on the lead.
    Cached,
    Resolved,
    NotFound,
    TimedOut,
    Unavailable,
    NoPostcode,
}

/// Full account of one decision. Returned to callers in both modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionReport {
    pub lead_id: Uuid,
    pub mode: DistributionMode,
    pub outcome: DistributionOutcome,
    pub geocoding: GeocodeStatus,
    pub coordinates: Option<Coordinates>,
    /// Every evaluated (lead, batch) pair with its reason.
    pub candidates: Vec<Candidate>,
    /// Committed distributions, or the planned ones when simulating.
    pub distributions: Vec<Distribution>,
    pub dropped: Vec<DroppedCandidate>,
    pub promoted: usize,
    /// Ordered human-readable log of the decision.
    pub trace: Vec<String>,
}

struct Trace {
    lead_id: Uuid,
    lines: Vec<String>,
}

impl Trace {
    fn new(lead_id: Uuid) -> Self {
        Self {
            lead_id,
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line: String) {
        tracing::info!(lead_id = %self.lead_id, "{}", line);
        self.lines.push(line);
    }
}

pub struct DistributionEngine {
    store: Arc<dyn DistributionStore>,
    geocoder: Arc<dyn Geocoder>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl DistributionEngine {
    pub fn new(
        store: Arc<dyn DistributionStore>,
        geocoder: Arc<dyn Geocoder>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            geocoder,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Load a lead by id and run a decision for it.
    pub async fn distribute(
        &self,
        lead_id: Uuid,
        mode: DistributionMode,
    ) -> Result<DistributionReport, AppError> {
        let lead = self
            .store
            .get_lead(lead_id)
            .await
            .context("Failed to load lead")?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

        self.distribute_lead(lead, mode).await
    }

    pub async fn distribute_lead(
        &self,
        lead: Lead,
        mode: DistributionMode,
    ) -> Result<DistributionReport, AppError> {
        if lead.vertical.trim().is_empty() {
            return Err(AppError::BadRequest(format!(
                "Lead {} has no vertical",
                lead.id
            )));
        }

        let mut trace = Trace::new(lead.id);
        trace.push(format!(
            "{} lead {} (vertical '{}', postcode {})",
            mode.as_str(),
            lead.id,
            lead.vertical,
            lead.postcode.as_deref().unwrap_or("-")
        ));

        let (geocoding, coordinates) = self.resolve_coordinates(&lead, mode, &mut trace).await;

        let batches = self
            .store
            .active_batches(&lead.vertical)
            .await
            .context("Failed to load active batches")?;
        let (total, open) = capacity_summary(&batches);
        trace.push(format!(
            "{} active batches for '{}', {} with capacity",
            total, lead.vertical, open
        ));

        let existing = self
            .store
            .distributions_for_lead(lead.id)
            .await
            .context("Failed to load existing distributions")?;
        let delivered: HashSet<Uuid> = existing.iter().map(|d| d.customer_id).collect();

        let profile = LeadProfile {
            postcode: lead.postcode.clone(),
            coordinates,
        };
        let candidates = Evaluator::new(self.settings.region_matching).evaluate_all(
            &profile,
            &batches,
            &delivered,
        );
        for c in &candidates {
            tracing::debug!(
                "batch {} ({}) eligible={} score={:?}: {}",
                c.batch_id,
                c.territory.as_str(),
                c.eligible,
                c.priority_score,
                c.reason
            );
        }

        let mut report = DistributionReport {
            lead_id: lead.id,
            mode,
            outcome: DistributionOutcome::NoActiveBatches,
            geocoding,
            coordinates,
            candidates,
            distributions: Vec::new(),
            dropped: Vec::new(),
            promoted: 0,
            trace: Vec::new(),
        };

        if let Some(outcome) = pre_selection_outcome(&report.candidates) {
            trace.push(format!("outcome: {}", outcome_label(outcome)));
            report.outcome = outcome;
            report.trace = trace.lines;
            return Ok(report);
        }

        let cap = self.settings.max_recipients_per_lead;
        let slots = cap.saturating_sub(existing.len());
        if slots == 0 {
            trace.push(format!(
                "lead already has {} of {} distributions",
                existing.len(),
                cap
            ));
            trace.push(format!(
                "outcome: {}",
                outcome_label(DistributionOutcome::CapReached)
            ));
            report.outcome = DistributionOutcome::CapReached;
            report.trace = trace.lines;
            return Ok(report);
        }

        let selection = select(&report.candidates, slots);
        trace.push(format!(
            "selected {} of {} open slots, {} in reserve",
            selection.selected.len(),
            slots,
            selection.reserves.len()
        ));

        let plan = CommitPlan {
            lead_id: lead.id,
            lead_cap: cap,
            slots,
            promote: self.settings.commit.promote_on_conflict,
        };
        let claimer: Box<dyn SlotClaimer> = match mode {
            DistributionMode::Commit => Box::new(LiveCommitter::new(
                self.store.clone(),
                self.settings.commit.clone(),
            )),
            DistributionMode::Simulate => Box::new(DryRunCommitter::new(self.store.clone())),
        };
        let result = commit_selection(claimer.as_ref(), plan, selection).await?;

        for d in &result.distributions {
            trace.push(format!(
                "{} customer {} via batch {}: {}",
                match mode {
                    DistributionMode::Commit => "committed",
                    DistributionMode::Simulate => "would commit",
                },
                d.customer_id,
                d.batch_id,
                d.rationale
            ));
        }
        for d in &result.dropped {
            trace.push(format!(
                "dropped batch {} of customer {}: {}",
                d.candidate.batch_id, d.candidate.customer_id, d.detail
            ));
        }

        report.outcome = if result.distributions.is_empty() {
            DistributionOutcome::LostAtCommit
        } else {
            DistributionOutcome::Distributed
        };
        trace.push(format!("outcome: {}", outcome_label(report.outcome)));

        if mode == DistributionMode::Commit {
            self.notify(&lead, &result.distributions, &batches).await;
        }

        report.distributions = result.distributions;
        report.dropped = result.dropped;
        report.promoted = result.promoted;
        report.trace = trace.lines;
        Ok(report)
    }

    /// Geocoding never fails a decision. Anything short of coordinates is
    /// reported and the lead is evaluated without them.
    async fn resolve_coordinates(
        &self,
        lead: &Lead,
        mode: DistributionMode,
        trace: &mut Trace,
    ) -> (GeocodeStatus, Option<Coordinates>) {
        if let Some(coordinates) = lead.coordinates() {
            trace.push(format!(
                "using stored coordinates ({:.4}, {:.4})",
                coordinates.lat, coordinates.lng
            ));
            return (GeocodeStatus::Cached, Some(coordinates));
        }

        let Some(postcode) = lead.postcode.as_deref() else {
            trace.push("no postcode, radius batches cannot match".to_string());
            return (GeocodeStatus::NoPostcode, None);
        };

        let lookup =
            tokio::time::timeout(self.settings.geocode_timeout, self.geocoder.geocode(postcode))
                .await;

        match lookup {
            Ok(Ok(GeocodeOutcome::Found(coordinates))) => {
                trace.push(format!(
                    "geocoded {} to ({:.4}, {:.4})",
                    postcode, coordinates.lat, coordinates.lng
                ));
                if mode == DistributionMode::Commit {
                    if let Err(e) = self.store.store_coordinates(lead.id, coordinates).await {
                        tracing::warn!("Failed to store coordinates for lead {}: {}", lead.id, e);
                    }
                }
                (GeocodeStatus::Resolved, Some(coordinates))
            }
            Ok(Ok(GeocodeOutcome::NotFound)) => {
                trace.push(format!("postcode {} not found", postcode));
                (GeocodeStatus::NotFound, None)
            }
            Ok(Err(GeocodeError::TimedOut(e))) => {
                tracing::warn!("Geocoder timed out for lead {}: {}", lead.id, e);
                trace.push(format!("geocoding {} timed out, treated as not found", postcode));
                (GeocodeStatus::TimedOut, None)
            }
            Ok(Err(e)) => {
                tracing::warn!("Geocoding failed for lead {}: {}", lead.id, e);
                trace.push(format!("geocoder unavailable, continuing without coordinates: {}", e));
                (GeocodeStatus::Unavailable, None)
            }
            Err(_) => {
                tracing::warn!(
                    "Geocoding timed out after {:?} for lead {}",
                    self.settings.geocode_timeout,
                    lead.id
                );
                trace.push(format!("geocoding {} timed out, treated as not found", postcode));
                (GeocodeStatus::TimedOut, None)
            }
        }
    }

    async fn notify(&self, lead: &Lead, distributions: &[Distribution], batches: &[CustomerBatch]) {
        for distribution in distributions {
            let batch = batches.iter().find(|b| b.id == distribution.batch_id);
            let notice = DistributionNotice::new(lead, distribution, batch);
            if let Err(e) = self.notifier.notify(&notice).await {
                tracing::error!(
                    "Notification for distribution {} failed: {}",
                    distribution.id,
                    e
                );
            }
        }
    }
}

fn outcome_label(outcome: DistributionOutcome) -> &'static str {
    match outcome {
        DistributionOutcome::Distributed => "distributed",
        DistributionOutcome::NoActiveBatches => "no active batches",
        DistributionOutcome::NoCapacity => "no capacity",
        DistributionOutcome::NoEligibleCandidates => "no eligible candidates",
        DistributionOutcome::CapReached => "cap reached",
        DistributionOutcome::LostAtCommit => "lost at commit",
    }
}
