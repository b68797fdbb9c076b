use std::collections::BTreeSet;

use dispatch_core::model::{Ambulance, AmbulanceId, EquipmentTier, GeoPoint};
use dispatch_core::spatial::{haversine_km, GeoIndex, NearbyFilter, EARTH_RADIUS_KM};
use proptest::prelude::*;

fn point() -> impl Strategy<Value = GeoPoint> {
    (-89.0f64..89.0, -179.0f64..179.0).prop_map(|(lat, lng)| GeoPoint::new(lat, lng))
}

/// Points scattered roughly 40 km around central Delhi.
fn delhi_point() -> impl Strategy<Value = GeoPoint> {
    (28.25f64..29.0, 76.8f64..77.6).prop_map(|(lat, lng)| GeoPoint::new(lat, lng))
}

proptest! {
    #[test]
    fn haversine_is_a_metric(a in point(), b in point(), c in point()) {
        let ab = haversine_km(a, b);
        prop_assert!(haversine_km(a, a).abs() < 1e-9);
        prop_assert!((ab - haversine_km(b, a)).abs() < 1e-6);
        prop_assert!(ab >= 0.0);
        prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_KM + 1e-6);
        prop_assert!(ab <= haversine_km(a, c) + haversine_km(c, b) + 1e-6);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn bucketed_search_matches_brute_force(
        positions in prop::collection::vec(delhi_point(), 150..220),
        center in delhi_point(),
        radius_km in 1.0f64..30.0,
    ) {
        let fleet = GeoIndex::new();
        for (i, location) in positions.iter().enumerate() {
            fleet
                .register(Ambulance::new(AmbulanceId(i as u64), *location, EquipmentTier::Basic))
                .unwrap();
        }

        let found = fleet.nearby(center, radius_km, NearbyFilter::All).unwrap();
        let found_ids: BTreeSet<AmbulanceId> = found.iter().map(|n| n.ambulance.id).collect();
        let expected: BTreeSet<AmbulanceId> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| haversine_km(center, **p) <= radius_km)
            .map(|(i, _)| AmbulanceId(i as u64))
            .collect();
        prop_assert_eq!(found_ids, expected);
        prop_assert!(found.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }
}
