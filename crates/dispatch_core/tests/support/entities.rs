#![allow(dead_code)]

use dispatch_core::model::{
    Ambulance, AmbulanceId, EmergencyRequest, Equipment, EquipmentTier, GeoPoint, Priority,
    RequestId, RideType,
};
use dispatch_core::test_helpers::{connaught_place, point_north_of};

/// Builder for ambulance fixtures placed a given distance north of the shared origin.
#[derive(Clone, Debug)]
pub struct AmbulanceBuilder {
    id: u64,
    km_north: f64,
    tier: EquipmentTier,
    equipment: Vec<Equipment>,
    rating: f64,
    fuel_level: f64,
    online: bool,
}

impl AmbulanceBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            km_north: 1.0,
            tier: EquipmentTier::Advanced,
            equipment: Vec::new(),
            rating: 4.5,
            fuel_level: 80.0,
            online: true,
        }
    }

    pub fn km_north(mut self, km: f64) -> Self {
        self.km_north = km;
        self
    }

    pub fn tier(mut self, tier: EquipmentTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn equipment(mut self, items: &[Equipment]) -> Self {
        self.equipment.extend_from_slice(items);
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub fn build(self) -> Ambulance {
        let mut ambulance = Ambulance::new(
            AmbulanceId(self.id),
            point_north_of(connaught_place(), self.km_north),
            self.tier,
        )
        .with_equipment(self.equipment)
        .with_rating(self.rating)
        .with_fuel_level(self.fuel_level);
        ambulance.online = self.online;
        ambulance
    }
}

/// Builder for request fixtures; defaults to a critical cardiac emergency at the origin.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    id: u64,
    pickup: GeoPoint,
    priority: Priority,
    emergency_type: String,
    ride_type: RideType,
}

impl RequestBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            pickup: connaught_place(),
            priority: Priority::Critical,
            emergency_type: "cardiac".to_string(),
            ride_type: RideType::Emergency,
        }
    }

    pub fn pickup(mut self, pickup: GeoPoint) -> Self {
        self.pickup = pickup;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn emergency_type(mut self, emergency_type: &str) -> Self {
        self.emergency_type = emergency_type.to_string();
        self
    }

    pub fn ride_type(mut self, ride_type: RideType) -> Self {
        self.ride_type = ride_type;
        self
    }

    pub fn build(self) -> EmergencyRequest {
        EmergencyRequest::new(
            RequestId(self.id),
            format!("+91-98{:08}", self.id),
            self.pickup,
            self.priority,
            self.emergency_type,
        )
        .with_ride_type(self.ride_type)
    }
}
