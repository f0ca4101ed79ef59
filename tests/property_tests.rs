/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;
use rust_lead_distribution::eligibility::{Evaluator, LeadProfile};
use rust_lead_distribution::geo::{haversine_km, Coordinates};
use rust_lead_distribution::geocoder::parse_postcode;
use rust_lead_distribution::leads::NewLead;
use rust_lead_distribution::memory_store::InMemoryStore;
use rust_lead_distribution::models::{Candidate, CustomerBatch, Territory, TerritoryKind};
use rust_lead_distribution::ranking::select;
use rust_lead_distribution::registry::{
    BatchRegistry, ClaimOutcome, DistributionLedger, LeadRepository, SlotClaim,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

fn coordinates() -> impl Strategy<Value = Coordinates> {
    (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinates { lat, lng })
}

// Property: distance is a metric-like function on the sphere
proptest! {
    #[test]
    fn distance_is_symmetric_and_bounded(a in coordinates(), b in coordinates()) {
        let ab = haversine_km(a, b);
        let ba = haversine_km(b, a);
        prop_assert!(ab >= 0.0);
        prop_assert!((ab - ba).abs() < 1e-6);
        // half the circumference
        prop_assert!(ab <= std::f64::consts::PI * 6371.0 + 1e-6);
    }

    #[test]
    fn distance_to_self_is_zero(a in coordinates()) {
        prop_assert!(haversine_km(a, a).abs() < 1e-9);
    }

    #[test]
    fn radius_eligibility_matches_distance(
        center in coordinates(),
        lead in coordinates(),
        radius_km in 0.0f64..2000.0
    ) {
        let batch = CustomerBatch {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            vertical: "solar".to_string(),
            total_batch_size: 1,
            current_batch_count: 0,
            is_active: true,
            territory: Territory::Radius { center: Some(center), radius_km },
            destination: serde_json::json!({}),
        };
        let profile = LeadProfile { postcode: None, coordinates: Some(lead) };
        let candidate = Evaluator::default().evaluate(&profile, &batch, &HashSet::new());
        prop_assert_eq!(candidate.eligible, haversine_km(lead, center) <= radius_km);
    }
}

// Property: postcode parsing never panics and is idempotent
proptest! {
    #[test]
    fn postcode_parsing_never_panics(raw in "\\PC*") {
        let _ = parse_postcode(&raw);
    }

    #[test]
    fn valid_postcodes_normalize(digits in 1000u16..=9999u16, letters in "[a-zA-Z]{2}", space in proptest::bool::ANY) {
        let raw = if space {
            format!("{} {}", digits, letters)
        } else {
            format!("{}{}", digits, letters)
        };
        let parsed = parse_postcode(&raw).unwrap();
        prop_assert_eq!(&parsed, &format!("{}{}", digits, letters.to_uppercase()));
        prop_assert_eq!(parse_postcode(&parsed), Some(parsed.clone()));
    }
}

fn candidate_strategy() -> impl Strategy<Value = Candidate> {
    (
        0u128..6,
        any::<u128>(),
        proptest::option::of(0.0f64..2000.0),
    )
        .prop_map(|(customer, batch, score)| Candidate {
            customer_id: Uuid::from_u128(customer),
            batch_id: Uuid::from_u128(batch),
            territory: TerritoryKind::Radius,
            priority_score: score,
            distance_km: None,
            eligible: score.is_some(),
            reason: String::new(),
            rejection: None,
        })
}

// Property: selection respects the slot count and never repeats a customer
proptest! {
    #[test]
    fn selection_respects_slots_and_customers(
        candidates in proptest::collection::vec(candidate_strategy(), 0..20),
        slots in 0usize..4
    ) {
        let selection = select(&candidates, slots);
        prop_assert!(selection.selected.len() <= slots);

        let customers: HashSet<Uuid> = selection.selected.iter().map(|c| c.customer_id).collect();
        prop_assert_eq!(customers.len(), selection.selected.len());

        prop_assert!(selection.selected.iter().chain(selection.reserves.iter()).all(|c| c.eligible));
        let eligible = candidates.iter().filter(|c| c.eligible).count();
        prop_assert_eq!(selection.selected.len() + selection.reserves.len(), eligible);

        let scores: Vec<f64> = selection.selected.iter().map(|c| c.priority_score.unwrap()).collect();
        prop_assert!(scores.windows(2).all(|w| w[0] <= w[1]));
    }
}

// Property: no sequence of claims overfills a batch or breaks the lead cap
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn claims_preserve_storage_invariants(
        sizes in proptest::collection::vec(0i32..4, 1..5),
        claims in proptest::collection::vec((0usize..6, 0usize..5), 0..40),
        lead_cap in 1i32..4
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let store = InMemoryStore::new();
            let batches: Vec<CustomerBatch> = sizes
                .iter()
                .map(|&size| CustomerBatch {
                    id: Uuid::new_v4(),
                    customer_id: Uuid::new_v4(),
                    vertical: "solar".to_string(),
                    total_batch_size: size,
                    current_batch_count: 0,
                    is_active: true,
                    territory: Territory::FullCountry,
                    destination: serde_json::json!({}),
                })
                .collect();
            for b in &batches {
                store.insert_batch(b.clone()).unwrap();
            }

            let mut leads = Vec::new();
            for i in 0..6 {
                let lead = store
                    .upsert_lead(&NewLead {
                        email: format!("lead{}@example.nl", i),
                        vertical: "solar".to_string(),
                        postcode: None,
                        name: None,
                        phone: None,
                        interests: serde_json::json!({}),
                    })
                    .await
                    .unwrap();
                leads.push(lead.id);
            }

            let mut committed: HashMap<Uuid, i32> = HashMap::new();
            for (lead_idx, batch_idx) in claims {
                let batch = &batches[batch_idx % batches.len()];
                let claim = SlotClaim {
                    lead_id: leads[lead_idx],
                    customer_id: batch.customer_id,
                    batch_id: batch.id,
                    rationale: "prop".to_string(),
                    lead_cap,
                };
                if let ClaimOutcome::Committed(_) = store.claim_slot(&claim).await.unwrap() {
                    *committed.entry(batch.id).or_insert(0) += 1;
                }
            }

            for b in &batches {
                let stored = store.get_batch(b.id).await.unwrap().unwrap();
                assert!(stored.current_batch_count <= stored.total_batch_size);
                assert_eq!(stored.current_batch_count, committed.get(&b.id).copied().unwrap_or(0));
            }

            let all = store.all_distributions();
            let pairs: HashSet<(Uuid, Uuid)> = all.iter().map(|d| (d.lead_id, d.customer_id)).collect();
            assert_eq!(pairs.len(), all.len());
            for lead in &leads {
                let count = store.distributions_for_lead(*lead).await.unwrap().len();
                assert!(count as i32 <= lead_cap);
            }
        });
    }
}
