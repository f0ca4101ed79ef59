use std::env;
use std::sync::Arc;
use uuid::Uuid;

use rust_lead_distribution::db::Database;
use rust_lead_distribution::db_storage::PgStore;
use rust_lead_distribution::leads::NewLead;
use rust_lead_distribution::registry::{
    BatchRegistry, ClaimOutcome, DistributionLedger, LeadRepository, SlotClaim,
};

/// Smoke test for the PostgreSQL store: migrations, upsert and the claim
/// transaction against a real database.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn claim_slot_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url, true).await?;
    let store = Arc::new(PgStore::new(db.pool.clone()));

    let vertical = format!("smoke-{}", Uuid::new_v4());
    let batch_id = Uuid::new_v4();
    let customer_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO customer_batches
            (id, customer_id, vertical, total_batch_size, current_batch_count, is_active,
             territory_type, regions, destination)
        VALUES ($1, $2, $3, 1, 0, true, 'full_country', '{}', '{}'::jsonb)
        "#,
    )
    .bind(batch_id)
    .bind(customer_id)
    .bind(&vertical)
    .execute(store.pool())
    .await?;

    let new_lead = |email: String| NewLead {
        email,
        vertical: vertical.clone(),
        postcode: Some("8011AA".to_string()),
        name: Some("Smoke Test".to_string()),
        phone: None,
        interests: serde_json::json!({}),
    };
    let first = store
        .upsert_lead(&new_lead(format!("{}@example.nl", Uuid::new_v4())))
        .await?;
    let second = store
        .upsert_lead(&new_lead(format!("{}@example.nl", Uuid::new_v4())))
        .await?;

    let claim = |lead_id| SlotClaim {
        lead_id,
        customer_id,
        batch_id,
        rationale: "full country coverage".to_string(),
        lead_cap: 2,
    };

    assert!(matches!(
        store.claim_slot(&claim(first.id)).await?,
        ClaimOutcome::Committed(_)
    ));
    assert!(matches!(
        store.claim_slot(&claim(first.id)).await?,
        ClaimOutcome::AlreadyDelivered { existing: Some(_) }
    ));
    assert!(matches!(
        store.claim_slot(&claim(second.id)).await?,
        ClaimOutcome::CapacityExhausted
    ));

    let batch = store
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("batch disappeared"))?;
    assert_eq!(batch.current_batch_count, 1);
    assert_eq!(store.distributions_for_lead(first.id).await?.len(), 1);

    let lead = store
        .get_lead(first.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("lead disappeared"))?;
    assert_eq!(lead.total_distribution_count, 1);
    Ok(())
}
