//! Storage seams consumed by the distribution engine.
//!
//! The engine only talks to persistence through these traits. The PostgreSQL
//! implementation lives in `db_storage`, the in-memory one in `memory_store`.
//! Both must enforce the two storage invariants themselves:
//!
//! - at most one distribution per (lead, customer)
//! - `current_batch_count <= total_batch_size` for every batch

use crate::geo::Coordinates;
use crate::leads::NewLead;
use crate::models::{CustomerBatch, Distribution, Lead};
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Infrastructure failures worth retrying. Logical conflicts never are.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Protocol(_) => true,
                // serialization_failure / deadlock_detected
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            StoreError::NotFound(_) | StoreError::InvalidRecord(_) => false,
        }
    }
}

/// A request to deliver a lead to a customer through one batch.
#[derive(Debug, Clone)]
pub struct SlotClaim {
    pub lead_id: Uuid,
    pub customer_id: Uuid,
    pub batch_id: Uuid,
    pub rationale: String,
    /// Lifetime cap on distributions for this lead.
    pub lead_cap: i32,
}

/// Result of one atomic claim.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// Distribution inserted and batch counter advanced by one.
    Committed(Distribution),
    /// The batch was full at commit time. Nothing written.
    CapacityExhausted,
    /// The customer already holds this lead. Nothing written.
    AlreadyDelivered { existing: Option<Distribution> },
    /// The lead already reached its distribution cap. Nothing written.
    LeadCapReached,
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    /// Insert or update a lead keyed on its email.
    async fn upsert_lead(&self, lead: &NewLead) -> Result<Lead, StoreError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, StoreError>;

    /// Cache resolved coordinates on the lead.
    async fn store_coordinates(&self, id: Uuid, coordinates: Coordinates)
        -> Result<(), StoreError>;
}

/// Read model over customer batches.
#[async_trait]
pub trait BatchRegistry: Send + Sync {
    /// Active batches for a vertical, ordered by id. Full batches are included
    /// so callers can tell "no batches" apart from "no capacity".
    async fn active_batches(&self, vertical: &str) -> Result<Vec<CustomerBatch>, StoreError>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<CustomerBatch>, StoreError>;
}

#[async_trait]
pub trait DistributionLedger: Send + Sync {
    async fn distributions_for_lead(&self, lead_id: Uuid)
        -> Result<Vec<Distribution>, StoreError>;

    /// Re-check capacity, insert the distribution and increment the batch
    /// counter as one atomic unit.
    async fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimOutcome, StoreError>;
}

/// Everything the engine needs from persistence.
pub trait DistributionStore: LeadRepository + BatchRegistry + DistributionLedger {}

impl<T> DistributionStore for T where T: LeadRepository + BatchRegistry + DistributionLedger {}

/// Capacity snapshot of a batch listing: (batches, batches with open slots).
pub fn capacity_summary(batches: &[CustomerBatch]) -> (usize, usize) {
    let open = batches.iter().filter(|b| b.has_capacity()).count();
    (batches.len(), open)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_errors_are_not_transient() {
        assert!(!StoreError::NotFound("lead".into()).is_transient());
        assert!(!StoreError::InvalidRecord("batch".into()).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_infrastructure_errors_are_transient() {
        assert!(StoreError::Unavailable("connection reset".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }
}
