use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::model::{AmbulanceId, EquipmentTier};

/// Per-factor scores (each 0..=100) before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance: f64,
    pub equipment: f64,
    pub rating: f64,
    pub priority_fit: f64,
    pub fuel: f64,
    pub availability: f64,
}

/// One shortlisted ambulance with its score, as recorded on the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub ambulance_id: AmbulanceId,
    pub tier: EquipmentTier,
    pub distance_km: f64,
    pub score: u32,
}

impl RankedCandidate {
    /// Best first: higher score, then shorter distance, then lower id.
    pub fn rank_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
        b.score
            .cmp(&a.score)
            .then_with(|| a.distance_km.total_cmp(&b.distance_km))
            .then_with(|| a.ambulance_id.cmp(&b.ambulance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64, score: u32, distance_km: f64) -> RankedCandidate {
        RankedCandidate {
            ambulance_id: AmbulanceId(id),
            tier: EquipmentTier::Basic,
            distance_km,
            score,
        }
    }

    #[test]
    fn ties_break_on_distance_then_id() {
        let mut list = vec![
            candidate(3, 70, 2.0),
            candidate(2, 70, 2.0),
            candidate(1, 70, 4.0),
            candidate(9, 90, 8.0),
        ];
        list.sort_by(RankedCandidate::rank_order);
        let ids: Vec<u64> = list.iter().map(|c| c.ambulance_id.0).collect();
        assert_eq!(ids, vec![9, 2, 3, 1]);
    }
}
