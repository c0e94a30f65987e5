//! Confidence gate: decide from retrieval distances alone whether to answer.
//!
//! Runs before any generation call. When even the best candidate is too far
//! from the question, the pipeline refuses instead of generating.

use serde::Serialize;

use crate::models::Candidate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GateDecision {
    fn refuse(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Allow iff the smallest finite distance is `<= max_best_distance`.
///
/// Pure function of the distances: chunk text and sources are never looked
/// at. Non-finite distances are ignored.
pub fn confidence_gate(candidates: &[Candidate], max_best_distance: f64) -> GateDecision {
    if candidates.is_empty() {
        return GateDecision::refuse("No candidates retrieved.".to_string());
    }

    let best = candidates
        .iter()
        .map(|c| c.distance)
        .filter(|d| d.is_finite())
        .fold(None, |best: Option<f64>, d| {
            Some(best.map_or(d, |b| b.min(d)))
        });

    let Some(best) = best else {
        return GateDecision::refuse("No candidates with a valid distance.".to_string());
    };

    if best > max_best_distance {
        return GateDecision::refuse(format!(
            "Low retrieval confidence (best distance={:.3} > {}).",
            best, max_best_distance
        ));
    }

    GateDecision {
        allowed: true,
        reason: format!("Retrieval looks OK (best distance={:.3}).", best),
    }
}
