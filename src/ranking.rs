use crate::models::{Candidate, RejectionCode};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Terminal state of one distribution decision.
///
/// The zero-distribution states are kept apart on purpose: operators need to
/// know whether a vertical has no buyers at all, only full buyers, or buyers
/// that simply did not match this lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionOutcome {
    /// At least one distribution committed (or planned, when simulating).
    Distributed,
    /// No active batch exists for the lead's vertical.
    NoActiveBatches,
    /// Active batches exist but every one of them is full.
    NoCapacity,
    /// Batches with capacity exist but none is eligible for this lead.
    NoEligibleCandidates,
    /// The lead already holds the maximum number of distributions.
    CapReached,
    /// Candidates were selected but every one lost its slot at commit time.
    LostAtCommit,
}

/// Selected winners plus the ranked eligible candidates that did not fit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selection {
    pub selected: Vec<Candidate>,
    /// Next in line, in rank order. Used for promotion on commit conflicts.
    pub reserves: Vec<Candidate>,
}

/// Total order over candidates: score ascending, then batch id.
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    let score_a = a.priority_score.unwrap_or(f64::INFINITY);
    let score_b = b.priority_score.unwrap_or(f64::INFINITY);
    score_a
        .total_cmp(&score_b)
        .then_with(|| a.batch_id.cmp(&b.batch_id))
}

/// Eligible candidates in priority order.
pub fn rank(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut eligible: Vec<Candidate> = candidates.iter().filter(|c| c.eligible).cloned().collect();
    eligible.sort_by(compare_candidates);
    eligible
}

/// Rank and take the first `slots` candidates, one batch per customer.
///
/// A customer's lower-ranked batches stay in the reserves: if its winning
/// batch fills up before commit, another of its batches may still deliver.
pub fn select(candidates: &[Candidate], slots: usize) -> Selection {
    let mut selection = Selection::default();
    let mut customers = HashSet::new();

    for candidate in rank(candidates) {
        if selection.selected.len() < slots && customers.insert(candidate.customer_id) {
            selection.selected.push(candidate);
        } else {
            selection.reserves.push(candidate);
        }
    }

    selection
}

/// Outcome that can be decided before selection, if any.
pub fn pre_selection_outcome(candidates: &[Candidate]) -> Option<DistributionOutcome> {
    if candidates.is_empty() {
        return Some(DistributionOutcome::NoActiveBatches);
    }
    if candidates
        .iter()
        .all(|c| c.rejection == Some(RejectionCode::NoCapacity))
    {
        return Some(DistributionOutcome::NoCapacity);
    }
    if !candidates.iter().any(|c| c.eligible) {
        return Some(DistributionOutcome::NoEligibleCandidates);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TerritoryKind;
    use uuid::Uuid;

    fn candidate(score: Option<f64>, batch_id: Uuid) -> Candidate {
        Candidate {
            customer_id: Uuid::new_v4(),
            batch_id,
            territory: TerritoryKind::FullCountry,
            priority_score: score,
            distance_km: None,
            eligible: score.is_some(),
            reason: String::new(),
            rejection: if score.is_some() {
                None
            } else {
                Some(RejectionCode::OutsideRadius)
            },
        }
    }

    #[test]
    fn test_select_orders_by_score_and_caps() {
        let cs = vec![
            candidate(Some(1000.0), Uuid::new_v4()),
            candidate(None, Uuid::new_v4()),
            candidate(Some(25.0), Uuid::new_v4()),
            candidate(Some(500.0), Uuid::new_v4()),
        ];
        let selection = select(&cs, 2);
        let scores: Vec<_> = selection
            .selected
            .iter()
            .map(|c| c.priority_score.unwrap())
            .collect();
        assert_eq!(scores, vec![25.0, 500.0]);
        assert_eq!(selection.reserves.len(), 1);
        assert_eq!(selection.reserves[0].priority_score, Some(1000.0));
    }

    #[test]
    fn test_ties_break_on_batch_id() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let cs = vec![candidate(Some(10.0), high), candidate(Some(10.0), low)];
        let ranked = rank(&cs);
        assert_eq!(ranked[0].batch_id, low);
        assert_eq!(ranked[1].batch_id, high);

        let reversed: Vec<_> = cs.into_iter().rev().collect();
        assert_eq!(rank(&reversed)[0].batch_id, low);
    }

    #[test]
    fn test_one_batch_per_customer_is_selected() {
        let mut a = candidate(Some(10.0), Uuid::new_v4());
        let mut a2 = candidate(Some(20.0), Uuid::new_v4());
        let b = candidate(Some(30.0), Uuid::new_v4());
        a.customer_id = Uuid::from_u128(7);
        a2.customer_id = Uuid::from_u128(7);

        let selection = select(&[a2.clone(), b.clone(), a.clone()], 2);
        let chosen: Vec<_> = selection.selected.iter().map(|c| c.batch_id).collect();
        assert_eq!(chosen, vec![a.batch_id, b.batch_id]);
        assert_eq!(selection.reserves[0].batch_id, a2.batch_id);
    }

    #[test]
    fn test_zero_slots_selects_nothing() {
        let cs = vec![candidate(Some(10.0), Uuid::new_v4())];
        let selection = select(&cs, 0);
        assert!(selection.selected.is_empty());
        assert_eq!(selection.reserves.len(), 1);
    }

    #[test]
    fn test_pre_selection_outcomes_are_distinct() {
        assert_eq!(
            pre_selection_outcome(&[]),
            Some(DistributionOutcome::NoActiveBatches)
        );

        let mut full = candidate(None, Uuid::new_v4());
        full.rejection = Some(RejectionCode::NoCapacity);
        assert_eq!(
            pre_selection_outcome(&[full.clone()]),
            Some(DistributionOutcome::NoCapacity)
        );

        let outside = candidate(None, Uuid::new_v4());
        assert_eq!(
            pre_selection_outcome(&[full.clone(), outside]),
            Some(DistributionOutcome::NoEligibleCandidates)
        );

        assert_eq!(
            pre_selection_outcome(&[full, candidate(Some(1.0), Uuid::new_v4())]),
            None
        );
    }
}
