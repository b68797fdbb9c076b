use std::collections::BTreeSet;

use crate::model::{Ambulance, EmergencyRequest, Equipment, Priority};

use super::types::ScoreBreakdown;

/// Request-side inputs to scoring, derived once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringContext {
    pub priority: Priority,
    pub required_equipment: BTreeSet<Equipment>,
}

impl ScoringContext {
    pub fn from_request(request: &EmergencyRequest) -> Self {
        Self {
            priority: request.priority,
            required_equipment: request.required_equipment(),
        }
    }
}

/// Scores one ambulance for one request.
///
/// Implementations must be pure: the same inputs always give the same score, and a
/// closer ambulance never scores lower than an otherwise identical farther one.
pub trait CandidateScorer: Send + Sync {
    /// Per-factor breakdown for the pairing.
    fn breakdown(
        &self,
        context: &ScoringContext,
        ambulance: &Ambulance,
        distance_km: f64,
    ) -> ScoreBreakdown;

    /// Final integer score (0..=100).
    fn score(&self, context: &ScoringContext, ambulance: &Ambulance, distance_km: f64) -> u32;
}
