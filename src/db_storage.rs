use crate::geo::Coordinates;
use crate::leads::NewLead;
use crate::models::{CustomerBatch, CustomerBatchRow, Distribution, Lead};
use crate::registry::{
    BatchRegistry, ClaimOutcome, DistributionLedger, LeadRepository, SlotClaim, StoreError,
};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

const BATCH_COLUMNS: &str = r#"
    id, customer_id, vertical, total_batch_size, current_batch_count, is_active,
    territory_type, center_lat, center_lng, radius_km, regions, destination
"#;

const LEAD_COLUMNS: &str = r#"
    id, email, vertical, postcode, lat, lng, name, phone, interests,
    total_distribution_count, unique_customers_count, created_at, updated_at
"#;

/// PostgreSQL-backed storage for leads, batches and distributions.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LeadRepository for PgStore {
    /// Upsert on email. A changed postcode clears the cached coordinates.
    async fn upsert_lead(&self, lead: &NewLead) -> Result<Lead, StoreError> {
        let query = format!(
            r#"
            INSERT INTO leads (id, email, vertical, postcode, name, phone, interests)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO UPDATE
            SET vertical = EXCLUDED.vertical,
                lat = CASE WHEN leads.postcode IS DISTINCT FROM EXCLUDED.postcode
                           THEN NULL ELSE leads.lat END,
                lng = CASE WHEN leads.postcode IS DISTINCT FROM EXCLUDED.postcode
                           THEN NULL ELSE leads.lng END,
                postcode = EXCLUDED.postcode,
                name = COALESCE(EXCLUDED.name, leads.name),
                phone = COALESCE(EXCLUDED.phone, leads.phone),
                interests = EXCLUDED.interests,
                updated_at = now()
            RETURNING {}
            "#,
            LEAD_COLUMNS
        );

        let row = sqlx::query_as::<_, Lead>(&query)
            .bind(Uuid::new_v4())
            .bind(&lead.email)
            .bind(&lead.vertical)
            .bind(&lead.postcode)
            .bind(&lead.name)
            .bind(&lead.phone)
            .bind(&lead.interests)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, StoreError> {
        let query = format!("SELECT {} FROM leads WHERE id = $1", LEAD_COLUMNS);
        let lead = sqlx::query_as::<_, Lead>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lead)
    }

    async fn store_coordinates(
        &self,
        id: Uuid,
        coordinates: Coordinates,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE leads SET lat = $2, lng = $3, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(coordinates.lat)
            .bind(coordinates.lng)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("lead {}", id)));
        }
        Ok(())
    }
}

fn into_batches(rows: Vec<CustomerBatchRow>) -> Vec<CustomerBatch> {
    rows.into_iter()
        .filter_map(|row| match CustomerBatch::try_from(row) {
            Ok(batch) => Some(batch),
            Err(e) => {
                tracing::warn!("Skipping malformed batch: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl BatchRegistry for PgStore {
    async fn active_batches(&self, vertical: &str) -> Result<Vec<CustomerBatch>, StoreError> {
        let query = format!(
            "SELECT {} FROM customer_batches WHERE is_active AND lower(vertical) = lower($1) ORDER BY id",
            BATCH_COLUMNS
        );
        let rows = sqlx::query_as::<_, CustomerBatchRow>(&query)
            .bind(vertical)
            .fetch_all(&self.pool)
            .await?;

        Ok(into_batches(rows))
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<CustomerBatch>, StoreError> {
        let query = format!("SELECT {} FROM customer_batches WHERE id = $1", BATCH_COLUMNS);
        let row = sqlx::query_as::<_, CustomerBatchRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CustomerBatch::try_from)
            .transpose()
            .map_err(StoreError::InvalidRecord)
    }
}

#[async_trait]
impl DistributionLedger for PgStore {
    async fn distributions_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<Distribution>, StoreError> {
        let rows = sqlx::query_as::<_, Distribution>(
            r#"
            SELECT id, lead_id, customer_id, batch_id, rationale, created_at
            FROM distributions
            WHERE lead_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// One transaction per claim:
    ///
    /// 1. lock the lead row, serializing claims for the same lead, and check
    ///    its cap against the ledger
    /// 2. conditional increment of the batch counter (fails when full)
    /// 3. insert guarded by UNIQUE (lead_id, customer_id)
    /// 4. refresh the lead's counters
    ///
    /// Any logical failure rolls back, so nothing is half-written.
    async fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM leads WHERE id = $1 FOR UPDATE")
            .bind(claim.lead_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("lead {}", claim.lead_id)));
        }

        let existing = sqlx::query_as::<_, Distribution>(
            r#"
            SELECT id, lead_id, customer_id, batch_id, rationale, created_at
            FROM distributions
            WHERE lead_id = $1
            "#,
        )
        .bind(claim.lead_id)
        .fetch_all(&mut *tx)
        .await?;

        if let Some(found) = existing.iter().find(|d| d.customer_id == claim.customer_id) {
            let found = found.clone();
            tx.rollback().await?;
            return Ok(ClaimOutcome::AlreadyDelivered {
                existing: Some(found),
            });
        }
        if existing.len() as i32 >= claim.lead_cap {
            tx.rollback().await?;
            return Ok(ClaimOutcome::LeadCapReached);
        }

        let advanced: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE customer_batches
            SET current_batch_count = current_batch_count + 1
            WHERE id = $1
              AND is_active
              AND current_batch_count < total_batch_size
            RETURNING current_batch_count
            "#,
        )
        .bind(claim.batch_id)
        .fetch_optional(&mut *tx)
        .await?;
        if advanced.is_none() {
            tx.rollback().await?;
            return Ok(ClaimOutcome::CapacityExhausted);
        }

        let inserted = sqlx::query_as::<_, Distribution>(
            r#"
            INSERT INTO distributions (id, lead_id, customer_id, batch_id, rationale)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (lead_id, customer_id) DO NOTHING
            RETURNING id, lead_id, customer_id, batch_id, rationale, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(claim.lead_id)
        .bind(claim.customer_id)
        .bind(claim.batch_id)
        .bind(&claim.rationale)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(distribution) = inserted else {
            // Lead row lock makes this unreachable in practice; the constraint
            // still has the final word.
            tx.rollback().await?;
            return Ok(ClaimOutcome::AlreadyDelivered { existing: None });
        };

        sqlx::query(
            r#"
            UPDATE leads
            SET total_distribution_count = total_distribution_count + 1,
                unique_customers_count = (
                    SELECT COUNT(DISTINCT customer_id) FROM distributions WHERE lead_id = $1
                ),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(claim.lead_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some((count,)) = advanced {
            tracing::debug!("Batch {} now at {} leads", claim.batch_id, count);
        }

        Ok(ClaimOutcome::Committed(distribution))
    }
}
