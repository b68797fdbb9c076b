//! Fare estimation for dispatched rides.
//!
//! Formula: `total = base_fare(ride_type) * priority_multiplier(ride_type)`, plus a distance
//! fare and an equipment surcharge in the direct dispatch flow.

use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::model::{EquipmentTier, RideType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base: f64,
    pub priority_multiplier: f64,
    pub distance_fare: f64,
    pub equipment_surcharge: f64,
    pub total: f64,
}

/// Fare quoted to the requester of a broadcast ride.
pub fn estimate_fare(pricing: &PricingConfig, ride_type: RideType) -> FareBreakdown {
    let base = pricing.base_fare(ride_type);
    let priority_multiplier = pricing.priority_multiplier(ride_type);
    FareBreakdown {
        base,
        priority_multiplier,
        distance_fare: 0.0,
        equipment_surcharge: 0.0,
        total: round_currency(base * priority_multiplier),
    }
}

/// Fare for the direct dispatch flow, where the bound ambulance and pickup distance are known.
pub fn estimate_dispatch_fare(
    pricing: &PricingConfig,
    ride_type: RideType,
    distance_km: f64,
    tier: EquipmentTier,
) -> FareBreakdown {
    let mut fare = estimate_fare(pricing, ride_type);
    fare.distance_fare = round_currency(distance_km.max(0.0) * pricing.per_km_rate);
    fare.equipment_surcharge = pricing.surcharge(tier);
    fare.total = round_currency(fare.total + fare.distance_fare + fare.equipment_surcharge);
    fare
}

fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_fare_applies_multiplier() {
        let fare = estimate_fare(&PricingConfig::default(), RideType::Emergency);
        assert_eq!(fare.base, 1500.0);
        assert_eq!(fare.priority_multiplier, 1.5);
        assert_eq!(fare.total, 2250.0);
    }

    #[test]
    fn ride_types_order_by_urgency() {
        let pricing = PricingConfig::default();
        let emergency = estimate_fare(&pricing, RideType::Emergency).total;
        let scheduled = estimate_fare(&pricing, RideType::Scheduled).total;
        let regular = estimate_fare(&pricing, RideType::Regular).total;
        assert_eq!(scheduled, 1000.0);
        assert_eq!(regular, 960.0);
        assert!(emergency > scheduled && scheduled > regular);
    }

    #[test]
    fn dispatch_fare_adds_distance_and_surcharge() {
        let pricing = PricingConfig::default();
        let fare =
            estimate_dispatch_fare(&pricing, RideType::Emergency, 4.0, EquipmentTier::Advanced);
        assert_eq!(fare.distance_fare, 60.0);
        assert_eq!(fare.equipment_surcharge, 500.0);
        assert_eq!(fare.total, 2250.0 + 60.0 + 500.0);
    }
}
