use std::sync::Arc;

use tracing::debug;

use crate::clock::ONE_SEC_MS;
use crate::config::MatchingConfig;
use crate::error::DispatchResult;
use crate::model::EmergencyRequest;
use crate::spatial::{GeoIndex, NearbyAmbulance, NearbyFilter};

use super::algorithm::{CandidateScorer, ScoringContext};
use super::scoring::ScoringEngine;
use super::types::RankedCandidate;

/// Which dispatch flow a candidate search serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Broadcast to nearby drivers and let them race.
    Broadcast,
    /// Direct assignment of the best unit over a wider area.
    Batch,
}

impl SearchMode {
    pub fn radius_km(self, config: &MatchingConfig) -> f64 {
        match self {
            SearchMode::Broadcast => config.broadcast_radius_km,
            SearchMode::Batch => config.batch_radius_km,
        }
    }
}

/// Estimated time (ms) to cover `distance_km` at `speed_kmh`. At least one second.
pub fn estimate_response_eta_ms(distance_km: f64, speed_kmh: f64) -> u64 {
    if distance_km <= 0.0 || speed_kmh <= 0.0 {
        return ONE_SEC_MS;
    }
    ((distance_km / speed_kmh) * 3_600_000.0)
        .round()
        .max(ONE_SEC_MS as f64) as u64
}

/// Score and rank already-filtered ambulances, keeping the best `limit`.
pub fn rank_candidates(
    scorer: &dyn CandidateScorer,
    request: &EmergencyRequest,
    nearby: &[NearbyAmbulance],
    limit: usize,
) -> Vec<RankedCandidate> {
    let context = ScoringContext::from_request(request);
    let mut ranked: Vec<RankedCandidate> = nearby
        .iter()
        .map(|n| RankedCandidate {
            ambulance_id: n.ambulance.id,
            tier: n.ambulance.tier,
            distance_km: n.distance_km,
            score: scorer.score(&context, &n.ambulance, n.distance_km),
        })
        .collect();
    ranked.sort_by(RankedCandidate::rank_order);
    ranked.truncate(limit);
    ranked
}

/// Finds, scores, and ranks the shortlist for a request.
pub struct CandidateFinder {
    fleet: Arc<GeoIndex>,
    scorer: Box<dyn CandidateScorer>,
    config: MatchingConfig,
}

impl CandidateFinder {
    pub fn new(fleet: Arc<GeoIndex>, config: MatchingConfig) -> Self {
        Self::with_scorer(fleet, config, Box::new(ScoringEngine::new()))
    }

    pub fn with_scorer(
        fleet: Arc<GeoIndex>,
        config: MatchingConfig,
        scorer: Box<dyn CandidateScorer>,
    ) -> Self {
        Self {
            fleet,
            scorer,
            config,
        }
    }

    /// Top-ranked candidates; empty (not an error) when nobody is in range.
    pub fn find_candidates(
        &self,
        request: &EmergencyRequest,
        mode: SearchMode,
    ) -> DispatchResult<Vec<RankedCandidate>> {
        let radius_km = mode.radius_km(&self.config);
        let nearby = self
            .fleet
            .nearby(request.pickup, radius_km, NearbyFilter::Dispatchable)?;
        let ranked = rank_candidates(
            self.scorer.as_ref(),
            request,
            &nearby,
            self.config.shortlist_size,
        );
        debug!(
            request_id = %request.id,
            mode = ?mode,
            in_radius = nearby.len(),
            shortlisted = ranked.len(),
            "candidate search"
        );
        Ok(ranked)
    }
}
