//! In-process store used by tests, demos and offline simulation.
//!
//! All mutations happen under one mutex, so a claim's capacity check, insert
//! and counter increment form a single critical section.

use crate::geo::Coordinates;
use crate::leads::NewLead;
use crate::models::{CustomerBatch, Distribution, Lead};
use crate::registry::{
    BatchRegistry, ClaimOutcome, DistributionLedger, LeadRepository, SlotClaim, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    leads: BTreeMap<Uuid, Lead>,
    batches: BTreeMap<Uuid, CustomerBatch>,
    distributions: Vec<Distribution>,
    /// Claims that should fail with a transient error before succeeding.
    pending_failures: u32,
    /// Claims that commit but report a transient error to the caller.
    lost_acknowledgements: u32,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store poisoned".to_string()))
    }

    pub fn insert_batch(&self, batch: CustomerBatch) -> Result<(), StoreError> {
        self.lock()?.batches.insert(batch.id, batch);
        Ok(())
    }

    /// Seed a historical distribution (e.g. from an earlier run).
    pub fn insert_distribution(&self, distribution: Distribution) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state
            .distributions
            .iter()
            .any(|d| d.lead_id == distribution.lead_id && d.customer_id == distribution.customer_id)
        {
            return Err(StoreError::InvalidRecord(format!(
                "lead {} already delivered to customer {}",
                distribution.lead_id, distribution.customer_id
            )));
        }
        state.distributions.push(distribution);
        Ok(())
    }

    /// Make the next `count` claims fail as if the connection dropped.
    pub fn fail_next_claims(&self, count: u32) -> Result<(), StoreError> {
        self.lock()?.pending_failures = count;
        Ok(())
    }

    /// Make the next `count` successful claims commit, then fail as if the
    /// connection dropped before the caller saw the result.
    pub fn drop_acknowledgement_of_next_claims(&self, count: u32) -> Result<(), StoreError> {
        self.lock()?.lost_acknowledgements = count;
        Ok(())
    }

    pub fn batch(&self, id: Uuid) -> Option<CustomerBatch> {
        self.lock().ok()?.batches.get(&id).cloned()
    }

    pub fn all_distributions(&self) -> Vec<Distribution> {
        self.lock()
            .map(|s| s.distributions.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LeadRepository for InMemoryStore {
    async fn upsert_lead(&self, lead: &NewLead) -> Result<Lead, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();

        if let Some(existing) = state.leads.values_mut().find(|l| l.email == lead.email) {
            if existing.postcode != lead.postcode {
                existing.lat = None;
                existing.lng = None;
            }
            existing.vertical = lead.vertical.clone();
            existing.postcode = lead.postcode.clone();
            existing.name = lead.name.clone().or(existing.name.take());
            existing.phone = lead.phone.clone().or(existing.phone.take());
            existing.interests = lead.interests.clone();
            existing.updated_at = Some(now);
            return Ok(existing.clone());
        }

        let created = Lead {
            id: Uuid::new_v4(),
            email: lead.email.clone(),
            vertical: lead.vertical.clone(),
            postcode: lead.postcode.clone(),
            lat: None,
            lng: None,
            name: lead.name.clone(),
            phone: lead.phone.clone(),
            interests: lead.interests.clone(),
            total_distribution_count: 0,
            unique_customers_count: 0,
            created_at: now,
            updated_at: None,
        };
        state.leads.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, StoreError> {
        Ok(self.lock()?.leads.get(&id).cloned())
    }

    async fn store_coordinates(
        &self,
        id: Uuid,
        coordinates: Coordinates,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let lead = state
            .leads
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("lead {}", id)))?;
        lead.lat = Some(coordinates.lat);
        lead.lng = Some(coordinates.lng);
        Ok(())
    }
}

#[async_trait]
impl BatchRegistry for InMemoryStore {
    async fn active_batches(&self, vertical: &str) -> Result<Vec<CustomerBatch>, StoreError> {
        Ok(self
            .lock()?
            .batches
            .values()
            .filter(|b| b.is_active && b.vertical.eq_ignore_ascii_case(vertical))
            .cloned()
            .collect())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<CustomerBatch>, StoreError> {
        Ok(self.lock()?.batches.get(&id).cloned())
    }
}

#[async_trait]
impl DistributionLedger for InMemoryStore {
    async fn distributions_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<Distribution>, StoreError> {
        Ok(self
            .lock()?
            .distributions
            .iter()
            .filter(|d| d.lead_id == lead_id)
            .cloned()
            .collect())
    }

    async fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.lock()?;

        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(StoreError::Unavailable("simulated connection reset".to_string()));
        }

        if !state.leads.contains_key(&claim.lead_id) {
            return Err(StoreError::NotFound(format!("lead {}", claim.lead_id)));
        }

        let for_lead: Vec<&Distribution> = state
            .distributions
            .iter()
            .filter(|d| d.lead_id == claim.lead_id)
            .collect();
        if let Some(existing) = for_lead.iter().find(|d| d.customer_id == claim.customer_id) {
            return Ok(ClaimOutcome::AlreadyDelivered {
                existing: Some((*existing).clone()),
            });
        }
        if for_lead.len() as i32 >= claim.lead_cap {
            return Ok(ClaimOutcome::LeadCapReached);
        }

        let batch = state
            .batches
            .get_mut(&claim.batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", claim.batch_id)))?;
        if !batch.is_active || batch.current_batch_count >= batch.total_batch_size {
            return Ok(ClaimOutcome::CapacityExhausted);
        }
        batch.current_batch_count += 1;

        let distribution = Distribution {
            id: Uuid::new_v4(),
            lead_id: claim.lead_id,
            customer_id: claim.customer_id,
            batch_id: claim.batch_id,
            rationale: claim.rationale.clone(),
            created_at: Utc::now(),
        };
        state.distributions.push(distribution.clone());

        let customers: std::collections::HashSet<Uuid> = state
            .distributions
            .iter()
            .filter(|d| d.lead_id == claim.lead_id)
            .map(|d| d.customer_id)
            .collect();
        if let Some(lead) = state.leads.get_mut(&claim.lead_id) {
            lead.total_distribution_count += 1;
            lead.unique_customers_count = customers.len() as i32;
            lead.updated_at = Some(Utc::now());
        }

        if state.lost_acknowledgements > 0 {
            state.lost_acknowledgements -= 1;
            return Err(StoreError::Unavailable(
                "simulated connection reset after commit".to_string(),
            ));
        }

        Ok(ClaimOutcome::Committed(distribution))
    }
}
