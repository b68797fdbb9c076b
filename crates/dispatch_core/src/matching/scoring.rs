use crate::model::{Ambulance, Equipment, EquipmentTier, Priority};

use super::algorithm::{CandidateScorer, ScoringContext};
use super::types::ScoreBreakdown;

pub const DISTANCE_WEIGHT: f64 = 0.40;
pub const EQUIPMENT_WEIGHT: f64 = 0.25;
pub const RATING_WEIGHT: f64 = 0.15;
pub const PRIORITY_WEIGHT: f64 = 0.10;
pub const FUEL_WEIGHT: f64 = 0.05;
pub const AVAILABILITY_WEIGHT: f64 = 0.05;

/// Distance score loses this many points per km (zero at 50 km).
const DISTANCE_DECAY_PER_KM: f64 = 2.0;

/// Rows: priority CRITICAL..LOW. Columns: tier BASIC..CRITICAL_CARE.
/// Each row peaks where the tier matches the severity.
const PRIORITY_TIER_FIT: [[f64; 4]; 4] = [
    [20.0, 40.0, 70.0, 100.0],
    [40.0, 70.0, 100.0, 80.0],
    [70.0, 100.0, 80.0, 60.0],
    [100.0, 80.0, 60.0, 40.0],
];

fn tier_base_score(tier: EquipmentTier) -> f64 {
    match tier {
        EquipmentTier::Basic => 20.0,
        EquipmentTier::Intermediate => 40.0,
        EquipmentTier::Advanced => 70.0,
        EquipmentTier::CriticalCare => 100.0,
    }
}

fn equipment_bonus(item: Equipment) -> f64 {
    match item {
        Equipment::Defibrillator | Equipment::Ventilator => 15.0,
        Equipment::Ecg | Equipment::Oxygen => 10.0,
        Equipment::Stretcher
        | Equipment::FirstAid
        | Equipment::CardiacMonitor
        | Equipment::Suction => 5.0,
    }
}

/// Weighted six-factor scorer: distance 40%, equipment 25%, rating 15%,
/// priority/tier fit 10%, fuel 5%, availability 5%.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoringEngine;

impl ScoringEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn distance_score(distance_km: f64) -> f64 {
        (100.0 - DISTANCE_DECAY_PER_KM * distance_km.max(0.0)).max(0.0)
    }

    pub fn equipment_score(context: &ScoringContext, ambulance: &Ambulance) -> f64 {
        let bonus: f64 = context
            .required_equipment
            .iter()
            .filter(|item| ambulance.equipment.contains(item))
            .map(|item| equipment_bonus(*item))
            .sum();
        (tier_base_score(ambulance.tier) + bonus).clamp(0.0, 100.0)
    }

    pub fn rating_score(rating: f64) -> f64 {
        (rating.clamp(0.0, 5.0) / 5.0) * 100.0
    }

    pub fn priority_fit(priority: Priority, tier: EquipmentTier) -> f64 {
        PRIORITY_TIER_FIT[priority.index()][tier.index()]
    }
}

impl CandidateScorer for ScoringEngine {
    fn breakdown(
        &self,
        context: &ScoringContext,
        ambulance: &Ambulance,
        distance_km: f64,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            distance: Self::distance_score(distance_km),
            equipment: Self::equipment_score(context, ambulance),
            rating: Self::rating_score(ambulance.rating),
            priority_fit: Self::priority_fit(context.priority, ambulance.tier),
            fuel: ambulance.fuel_level.clamp(0.0, 100.0),
            availability: if ambulance.is_dispatchable() { 100.0 } else { 0.0 },
        }
    }

    fn score(&self, context: &ScoringContext, ambulance: &Ambulance, distance_km: f64) -> u32 {
        let b = self.breakdown(context, ambulance, distance_km);
        let total = DISTANCE_WEIGHT * b.distance
            + EQUIPMENT_WEIGHT * b.equipment
            + RATING_WEIGHT * b.rating
            + PRIORITY_WEIGHT * b.priority_fit
            + FUEL_WEIGHT * b.fuel
            + AVAILABILITY_WEIGHT * b.availability;
        total.round() as u32
    }
}
