pub mod algorithm;
pub mod candidates;
pub mod scoring;
pub mod types;

pub use algorithm::{CandidateScorer, ScoringContext};
pub use candidates::{estimate_response_eta_ms, rank_candidates, CandidateFinder, SearchMode};
pub use scoring::ScoringEngine;
pub use types::{RankedCandidate, ScoreBreakdown};
