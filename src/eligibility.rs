//! Per (lead, batch) eligibility.
//!
//! Checks run in a fixed order and the first failing one decides the
//! rejection reason:
//!
//! 1. capacity
//! 2. duplicate delivery to the same customer (across all batches)
//! 3. territory
//!
//! Nothing in here touches storage. The capacity check reads a snapshot and
//! can be stale; the committer re-checks it atomically.

use crate::geo::{haversine_km, Coordinates};
use crate::models::{Candidate, CustomerBatch, RejectionCode, Territory};
use crate::regions::{is_known_province, matching_region};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Score of a full-country match. Lowest priority among eligible candidates.
pub const FULL_COUNTRY_SCORE: f64 = 1000.0;
/// Score of a region match.
pub const REGIONS_SCORE: f64 = 500.0;

/// How `regions` territories are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionMatching {
    /// Lead postcode must fall in one of the batch's regions.
    #[default]
    Postcode,
    /// Every lead matches. Legacy behaviour, kept for migration.
    Permissive,
}

impl std::str::FromStr for RegionMatching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postcode" => Ok(RegionMatching::Postcode),
            "permissive" => Ok(RegionMatching::Permissive),
            other => Err(format!("unknown region matching mode '{}'", other)),
        }
    }
}

/// The parts of a lead the evaluator looks at.
#[derive(Debug, Clone, Default)]
pub struct LeadProfile {
    pub postcode: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    pub region_matching: RegionMatching,
}

impl Evaluator {
    pub fn new(region_matching: RegionMatching) -> Self {
        Self { region_matching }
    }

    /// Evaluate every batch for one lead, preserving batch order.
    pub fn evaluate_all(
        &self,
        lead: &LeadProfile,
        batches: &[CustomerBatch],
        delivered_customers: &HashSet<Uuid>,
    ) -> Vec<Candidate> {
        batches
            .iter()
            .map(|batch| self.evaluate(lead, batch, delivered_customers))
            .collect()
    }

    pub fn evaluate(
        &self,
        lead: &LeadProfile,
        batch: &CustomerBatch,
        delivered_customers: &HashSet<Uuid>,
    ) -> Candidate {
        let candidate = Candidate {
            customer_id: batch.customer_id,
            batch_id: batch.id,
            territory: batch.territory.kind(),
            priority_score: None,
            distance_km: None,
            eligible: false,
            reason: String::new(),
            rejection: None,
        };

        if !batch.has_capacity() {
            return reject(
                candidate,
                RejectionCode::NoCapacity,
                format!(
                    "no capacity ({}/{})",
                    batch.current_batch_count, batch.total_batch_size
                ),
            );
        }

        if delivered_customers.contains(&batch.customer_id) {
            return reject(
                candidate,
                RejectionCode::AlreadyReceived,
                "customer already received this lead".to_string(),
            );
        }

        match &batch.territory {
            Territory::FullCountry => accept(
                candidate,
                FULL_COUNTRY_SCORE,
                "full country coverage".to_string(),
            ),
            Territory::Radius { center, radius_km } => {
                let Some(lead_coords) = lead.coordinates else {
                    return reject(
                        candidate,
                        RejectionCode::LeadNotGeocoded,
                        "lead not geocoded".to_string(),
                    );
                };
                let Some(center) = center else {
                    return reject(
                        candidate,
                        RejectionCode::BatchHasNoCenter,
                        "batch has no center".to_string(),
                    );
                };

                let distance = haversine_km(lead_coords, *center);
                let candidate = Candidate {
                    distance_km: Some(distance),
                    ..candidate
                };
                if distance <= *radius_km {
                    accept(
                        candidate,
                        *radius_km,
                        format!("within radius: {:.1} km <= {:.1} km", distance, radius_km),
                    )
                } else {
                    reject(
                        candidate,
                        RejectionCode::OutsideRadius,
                        format!("outside radius: {:.1} km > {:.1} km", distance, radius_km),
                    )
                }
            }
            Territory::Regions { regions } => self.evaluate_regions(lead, regions, candidate),
        }
    }

    fn evaluate_regions(
        &self,
        lead: &LeadProfile,
        regions: &[String],
        candidate: Candidate,
    ) -> Candidate {
        if self.region_matching == RegionMatching::Permissive {
            return accept(
                candidate,
                REGIONS_SCORE,
                "region matching not enforced (permissive mode)".to_string(),
            );
        }

        let Some(postcode) = lead.postcode.as_deref() else {
            return reject(
                candidate,
                RejectionCode::LeadHasNoPostcode,
                "lead has no postcode for region matching".to_string(),
            );
        };

        match matching_region(postcode, regions) {
            Some(region) => accept(
                candidate,
                REGIONS_SCORE,
                format!("postcode {} in region {}", postcode, region),
            ),
            None => {
                for unknown in regions.iter().filter(|r| {
                    !r.chars().all(|c| c.is_ascii_digit()) && !is_known_province(r)
                }) {
                    tracing::debug!("Batch {} lists unknown region '{}'", candidate.batch_id, unknown);
                }
                reject(
                    candidate,
                    RejectionCode::OutsideRegions,
                    format!("postcode {} outside regions [{}]", postcode, regions.join(", ")),
                )
            }
        }
    }
}

fn accept(candidate: Candidate, score: f64, reason: String) -> Candidate {
    Candidate {
        priority_score: Some(score),
        eligible: true,
        reason,
        rejection: None,
        ..candidate
    }
}

fn reject(candidate: Candidate, code: RejectionCode, reason: String) -> Candidate {
    Candidate {
        priority_score: None,
        eligible: false,
        reason,
        rejection: Some(code),
        ..candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(territory: Territory, current: i32, total: i32) -> CustomerBatch {
        CustomerBatch {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            vertical: "solar".to_string(),
            total_batch_size: total,
            current_batch_count: current,
            is_active: true,
            territory,
            destination: json!({}),
        }
    }

    fn zwolle() -> Coordinates {
        Coordinates::new(52.5125, 6.0944).unwrap()
    }

    fn lead_at(coordinates: Option<Coordinates>) -> LeadProfile {
        LeadProfile {
            postcode: Some("8011AA".to_string()),
            coordinates,
        }
    }

    #[test]
    fn test_capacity_is_checked_first() {
        let b = batch(Territory::FullCountry, 10, 10);
        let delivered: HashSet<Uuid> = [b.customer_id].into_iter().collect();
        let c = Evaluator::default().evaluate(&lead_at(None), &b, &delivered);
        assert!(!c.eligible);
        assert_eq!(c.rejection, Some(RejectionCode::NoCapacity));
        assert_eq!(c.reason, "no capacity (10/10)");
    }

    #[test]
    fn test_duplicate_customer_is_rejected() {
        let b = batch(Territory::FullCountry, 0, 10);
        let delivered: HashSet<Uuid> = [b.customer_id].into_iter().collect();
        let c = Evaluator::default().evaluate(&lead_at(None), &b, &delivered);
        assert_eq!(c.rejection, Some(RejectionCode::AlreadyReceived));
    }

    #[test]
    fn test_full_country_always_eligible_with_low_priority() {
        let b = batch(Territory::FullCountry, 0, 10);
        let c = Evaluator::default().evaluate(&LeadProfile::default(), &b, &HashSet::new());
        assert!(c.eligible);
        assert_eq!(c.priority_score, Some(FULL_COUNTRY_SCORE));
    }

    #[test]
    fn test_radius_requires_lead_coordinates() {
        let b = batch(
            Territory::Radius {
                center: Some(zwolle()),
                radius_km: 25.0,
            },
            0,
            10,
        );
        let c = Evaluator::default().evaluate(&lead_at(None), &b, &HashSet::new());
        assert_eq!(c.rejection, Some(RejectionCode::LeadNotGeocoded));
        assert_eq!(c.reason, "lead not geocoded");
    }

    #[test]
    fn test_radius_requires_batch_center() {
        let b = batch(
            Territory::Radius {
                center: None,
                radius_km: 25.0,
            },
            0,
            10,
        );
        let c = Evaluator::default().evaluate(&lead_at(Some(zwolle())), &b, &HashSet::new());
        assert_eq!(c.rejection, Some(RejectionCode::BatchHasNoCenter));
    }

    #[test]
    fn test_radius_match_scores_by_radius() {
        let b = batch(
            Territory::Radius {
                center: Some(zwolle()),
                radius_km: 25.0,
            },
            9,
            10,
        );
        // ~5.5 km north of the center
        let lead = lead_at(Coordinates::new(52.5625, 6.0944));
        let c = Evaluator::default().evaluate(&lead, &b, &HashSet::new());
        assert!(c.eligible, "{}", c.reason);
        assert_eq!(c.priority_score, Some(25.0));
        let d = c.distance_km.unwrap();
        assert!(d > 5.0 && d < 6.0);
    }

    #[test]
    fn test_radius_boundary_is_inclusive() {
        let far = Coordinates::new(52.7, 6.0944).unwrap();
        let exact = haversine_km(zwolle(), far);
        let b = batch(
            Territory::Radius {
                center: Some(zwolle()),
                radius_km: exact,
            },
            0,
            10,
        );
        let c = Evaluator::default().evaluate(&lead_at(Some(far)), &b, &HashSet::new());
        assert!(c.eligible);

        let b = batch(
            Territory::Radius {
                center: Some(zwolle()),
                radius_km: exact - 0.001,
            },
            0,
            10,
        );
        let c = Evaluator::default().evaluate(&lead_at(Some(far)), &b, &HashSet::new());
        assert_eq!(c.rejection, Some(RejectionCode::OutsideRadius));
    }

    #[test]
    fn test_regions_match_by_postcode() {
        let b = batch(
            Territory::Regions {
                regions: vec!["Overijssel".to_string()],
            },
            0,
            10,
        );
        let c = Evaluator::default().evaluate(&lead_at(None), &b, &HashSet::new());
        assert!(c.eligible);
        assert_eq!(c.priority_score, Some(REGIONS_SCORE));
        assert_eq!(c.reason, "postcode 8011AA in region Overijssel");

        let other = LeadProfile {
            postcode: Some("1012AB".to_string()),
            coordinates: None,
        };
        let c = Evaluator::default().evaluate(&other, &b, &HashSet::new());
        assert_eq!(c.rejection, Some(RejectionCode::OutsideRegions));
    }

    #[test]
    fn test_regions_without_postcode() {
        let b = batch(
            Territory::Regions {
                regions: vec!["Overijssel".to_string()],
            },
            0,
            10,
        );
        let strict = Evaluator::new(RegionMatching::Postcode);
        let c = strict.evaluate(&LeadProfile::default(), &b, &HashSet::new());
        assert_eq!(c.rejection, Some(RejectionCode::LeadHasNoPostcode));

        let permissive = Evaluator::new(RegionMatching::Permissive);
        let c = permissive.evaluate(&LeadProfile::default(), &b, &HashSet::new());
        assert!(c.eligible);
        assert_eq!(c.priority_score, Some(REGIONS_SCORE));
    }

    #[test]
    fn test_region_matching_parses() {
        assert_eq!("Permissive".parse::<RegionMatching>(), Ok(RegionMatching::Permissive));
        assert_eq!("postcode".parse::<RegionMatching>(), Ok(RegionMatching::Postcode));
        assert!("fuzzy".parse::<RegionMatching>().is_err());
    }
}
