//! Capacity-safe commit of a selection.
//!
//! The committer is the only place batch counters change. Every claim goes
//! through [`DistributionLedger::claim_slot`], which re-checks capacity and
//! increments the counter atomically, so a stale snapshot from eligibility
//! evaluation can never push a batch over its size.
//!
//! Losing a slot race is an expected outcome, not an error: the candidate is
//! dropped and, when promotion is enabled, the next reserve takes its place.
//! Only persistence failures are retried.

use crate::errors::AppError;
use crate::models::{Candidate, Distribution};
use crate::ranking::Selection;
use crate::registry::{ClaimOutcome, DistributionStore, SlotClaim};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CommitPolicy {
    /// Attempts per claim for transient persistence failures (>= 1).
    pub max_attempts: u32,
    /// Base delay, doubled after each failed attempt.
    pub backoff: Duration,
    /// Promote the next-ranked reserve when a selected candidate is dropped.
    pub promote_on_conflict: bool,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            promote_on_conflict: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Batch filled up between evaluation and commit.
    CapacityExhausted,
    /// Customer already holds this lead.
    AlreadyReceived,
    /// Lead reached its distribution cap concurrently.
    LeadCapReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedCandidate {
    pub candidate: Candidate,
    pub reason: DropReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitResult {
    /// Committed distributions (planned ones when simulating), in commit order.
    pub distributions: Vec<Distribution>,
    pub dropped: Vec<DroppedCandidate>,
    /// Reserves that were promoted into a freed slot.
    pub promoted: usize,
}

/// Parameters of one commit run.
#[derive(Debug, Clone, Copy)]
pub struct CommitPlan {
    pub lead_id: Uuid,
    /// Lifetime cap on distributions per lead.
    pub lead_cap: usize,
    /// Slots still open for this lead in this run.
    pub slots: usize,
    pub promote: bool,
}

/// One atomic claim. Live and dry-run committers differ only here.
#[async_trait]
pub trait SlotClaimer: Send + Sync {
    async fn claim(&self, claim: &SlotClaim) -> Result<ClaimOutcome, AppError>;
}

/// Walk the selection in rank order and claim slots until the plan is filled.
pub async fn commit_selection(
    claimer: &dyn SlotClaimer,
    plan: CommitPlan,
    selection: Selection,
) -> Result<CommitResult, AppError> {
    let mut queue: VecDeque<Candidate> = selection.selected.into();
    let mut reserves = selection.reserves.into_iter();
    let mut result = CommitResult::default();
    let mut committed_customers: HashSet<Uuid> = HashSet::new();

    while result.distributions.len() < plan.slots {
        let candidate = match queue.pop_front() {
            Some(c) => c,
            None if plan.promote => match reserves.next() {
                Some(c) => {
                    tracing::info!(
                        "Promoting reserve batch {} for lead {}",
                        c.batch_id,
                        plan.lead_id
                    );
                    result.promoted += 1;
                    c
                }
                None => break,
            },
            None => break,
        };

        if committed_customers.contains(&candidate.customer_id) {
            result.dropped.push(DroppedCandidate {
                reason: DropReason::AlreadyReceived,
                detail: "customer already received this lead in this run".to_string(),
                candidate,
            });
            continue;
        }

        let claim = SlotClaim {
            lead_id: plan.lead_id,
            customer_id: candidate.customer_id,
            batch_id: candidate.batch_id,
            rationale: candidate.reason.clone(),
            lead_cap: i32::try_from(plan.lead_cap).unwrap_or(i32::MAX),
        };

        match claimer.claim(&claim).await? {
            ClaimOutcome::Committed(distribution) => {
                tracing::info!(
                    "Lead {} -> customer {} via batch {}",
                    plan.lead_id,
                    distribution.customer_id,
                    distribution.batch_id
                );
                committed_customers.insert(distribution.customer_id);
                result.distributions.push(distribution);
            }
            ClaimOutcome::CapacityExhausted => {
                tracing::warn!(
                    "Batch {} filled up before commit of lead {}",
                    candidate.batch_id,
                    plan.lead_id
                );
                result.dropped.push(DroppedCandidate {
                    reason: DropReason::CapacityExhausted,
                    detail: "capacity check failed at commit time".to_string(),
                    candidate,
                });
            }
            ClaimOutcome::AlreadyDelivered { .. } => {
                result.dropped.push(DroppedCandidate {
                    reason: DropReason::AlreadyReceived,
                    detail: "customer already received this lead".to_string(),
                    candidate,
                });
            }
            ClaimOutcome::LeadCapReached => {
                tracing::warn!("Lead {} reached its cap during commit", plan.lead_id);
                let rest: Vec<Candidate> = std::iter::once(candidate).chain(queue.drain(..)).collect();
                for candidate in rest {
                    result.dropped.push(DroppedCandidate {
                        reason: DropReason::LeadCapReached,
                        detail: format!("lead already has {} distributions", plan.lead_cap),
                        candidate,
                    });
                }
                break;
            }
        }
    }

    Ok(result)
}

/// Writes distributions and advances batch counters.
pub struct LiveCommitter {
    store: Arc<dyn DistributionStore>,
    policy: CommitPolicy,
}

impl LiveCommitter {
    pub fn new(store: Arc<dyn DistributionStore>, policy: CommitPolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl SlotClaimer for LiveCommitter {
    async fn claim(&self, claim: &SlotClaim) -> Result<ClaimOutcome, AppError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.store.claim_slot(claim).await {
                // An earlier attempt may have committed before its connection
                // dropped; the unique (lead, customer) row proves it.
                Ok(ClaimOutcome::AlreadyDelivered {
                    existing: Some(existing),
                }) if attempt > 1 && existing.batch_id == claim.batch_id => {
                    tracing::info!(
                        "Claim for lead {} on batch {} already landed on an earlier attempt",
                        claim.lead_id,
                        claim.batch_id
                    );
                    return Ok(ClaimOutcome::Committed(existing));
                }
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        "Claim attempt {}/{} for lead {} on batch {} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        claim.lead_id,
                        claim.batch_id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::error!(
                        "Claim for lead {} on batch {} failed after {} attempts: {}",
                        claim.lead_id,
                        claim.batch_id,
                        attempt,
                        e
                    );
                    return Err(AppError::DistributionFailed(format!(
                        "lead {}: {} attempts exhausted: {}",
                        claim.lead_id, attempt, e
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[derive(Debug, Default)]
struct DryRunState {
    /// Slots planned per batch in this run.
    planned_per_batch: HashMap<Uuid, i32>,
    planned_customers: HashSet<Uuid>,
}

/// Simulation committer: read-only capacity re-check, no writes.
///
/// Tracks what it has already planned so a simulated run never claims more
/// slots of a batch than the batch has left.
pub struct DryRunCommitter {
    store: Arc<dyn DistributionStore>,
    state: Mutex<DryRunState>,
}

impl DryRunCommitter {
    pub fn new(store: Arc<dyn DistributionStore>) -> Self {
        Self {
            store,
            state: Mutex::new(DryRunState::default()),
        }
    }
}

#[async_trait]
impl SlotClaimer for DryRunCommitter {
    async fn claim(&self, claim: &SlotClaim) -> Result<ClaimOutcome, AppError> {
        let batch = self.store.get_batch(claim.batch_id).await?;
        let existing = self.store.distributions_for_lead(claim.lead_id).await?;

        let mut state = self
            .state
            .lock()
            .map_err(|_| AppError::InternalError("dry-run state poisoned".to_string()))?;

        if let Some(found) = existing.iter().find(|d| d.customer_id == claim.customer_id) {
            return Ok(ClaimOutcome::AlreadyDelivered {
                existing: Some(found.clone()),
            });
        }
        if state.planned_customers.contains(&claim.customer_id) {
            return Ok(ClaimOutcome::AlreadyDelivered { existing: None });
        }
        if existing.len() + state.planned_customers.len() >= claim.lead_cap.max(0) as usize {
            return Ok(ClaimOutcome::LeadCapReached);
        }

        let planned = state
            .planned_per_batch
            .get(&claim.batch_id)
            .copied()
            .unwrap_or(0);
        let open = match &batch {
            Some(b) => b.is_active && b.current_batch_count + planned < b.total_batch_size,
            None => false,
        };
        if !open {
            return Ok(ClaimOutcome::CapacityExhausted);
        }

        *state.planned_per_batch.entry(claim.batch_id).or_insert(0) += 1;
        state.planned_customers.insert(claim.customer_id);

        Ok(ClaimOutcome::Committed(Distribution {
            id: Uuid::new_v4(),
            lead_id: claim.lead_id,
            customer_id: claim.customer_id,
            batch_id: claim.batch_id,
            rationale: claim.rationale.clone(),
            created_at: Utc::now(),
        }))
    }
}
