//! Dispatch a handful of emergencies across a Delhi fleet and print the outcomes as JSON.
//!
//! Run with: cargo run -p dispatch_core --example dispatch_run

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::DispatchConfig;
use dispatch_core::model::{
    Ambulance, AmbulanceId, EmergencyRequest, Equipment, EquipmentTier, GeoPoint, Priority,
    RequestId,
};
use dispatch_core::notify::{ChannelNotifier, DispatchEvent};
use dispatch_core::{logging, DispatchCoordinator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FLEET_SIZE: u64 = 40;
const SEED: u64 = 123;

fn delhi_fleet(rng: &mut StdRng) -> Vec<Ambulance> {
    (0..FLEET_SIZE)
        .map(|id| {
            let location = GeoPoint::new(rng.gen_range(28.50..28.75), rng.gen_range(77.05..77.35));
            let tier = EquipmentTier::ALL[rng.gen_range(0..EquipmentTier::ALL.len())];
            let mut kit = vec![Equipment::FirstAid, Equipment::Oxygen];
            if tier >= EquipmentTier::Advanced {
                kit.extend([Equipment::Defibrillator, Equipment::Ecg]);
            }
            Ambulance::new(AmbulanceId(id), location, tier)
                .with_equipment(kit)
                .with_rating(rng.gen_range(3.5..5.0))
                .with_fuel_level(rng.gen_range(30.0..100.0))
        })
        .collect()
}

fn last_code(events: &[DispatchEvent], request_id: RequestId) -> Option<String> {
    events.iter().rev().find_map(|e| match e {
        DispatchEvent::OtpIssued {
            request_id: id,
            code,
            ..
        } if *id == request_id => Some(code.clone()),
        _ => None,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let mut rng = StdRng::seed_from_u64(SEED);
    let (notifier, mut events) = ChannelNotifier::new();
    let config = DispatchConfig::default()
        .with_otp_seed(SEED)
        .with_acceptance_window_secs(2);
    let coordinator = Arc::new(
        DispatchCoordinator::builder(config)
            .notifier(Arc::new(notifier))
            .build()?,
    );
    for ambulance in delhi_fleet(&mut rng) {
        coordinator.fleet().register(ambulance)?;
    }
    let mut drain = move || {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    };

    // Broadcast flow: every shortlisted driver races to accept.
    let cardiac = EmergencyRequest::new(
        RequestId(1),
        "+91-9810000001",
        GeoPoint::new(28.6315, 77.2167),
        Priority::Critical,
        "cardiac",
    )
    .with_symptoms(["chest pain"]);
    let receipt = coordinator.request_ride(cardiac)?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);

    let shortlist = coordinator.get_status(RequestId(1))?.candidates;
    let racers: Vec<_> = shortlist
        .iter()
        .map(|candidate| {
            let coordinator = Arc::clone(&coordinator);
            let ambulance_id = candidate.ambulance_id;
            tokio::task::spawn_blocking(move || coordinator.accept_ride(ambulance_id, RequestId(1)))
        })
        .collect();
    for racer in racers {
        let outcome = racer.await??;
        println!("{}", serde_json::to_string(&outcome)?);
    }

    let winner = coordinator
        .get_status(RequestId(1))?
        .ambulance
        .ok_or("no winner")?;
    coordinator.generate_otp(RequestId(1))?;
    let code = last_code(&drain(), RequestId(1)).ok_or("otp not delivered")?;
    coordinator.verify_otp(winner, RequestId(1), &code)?;
    let done = coordinator.complete_ride(RequestId(1), true, None)?;
    println!("{}", serde_json::to_string_pretty(&done)?);

    // Direct flow: the best unit within the wide radius is bound immediately.
    let fall = EmergencyRequest::new(
        RequestId(2),
        "+91-9810000002",
        GeoPoint::new(28.55, 77.10),
        Priority::High,
        "trauma",
    );
    let dispatched = coordinator.dispatch_nearest(fall)?;
    println!("{}", serde_json::to_string_pretty(&dispatched)?);

    // Nobody answers: the acceptance window closes on its own.
    let ignored = EmergencyRequest::new(
        RequestId(3),
        "+91-9810000003",
        GeoPoint::new(28.70, 77.20),
        Priority::Medium,
        "respiratory",
    );
    coordinator.request_ride(ignored)?;
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let status = coordinator.get_status(RequestId(3))?;
    println!("request 3 ended as {}", status.state);

    let transitions = drain()
        .into_iter()
        .filter(|e| matches!(e, DispatchEvent::StatusChanged { .. }))
        .count();
    println!("status events since OTP: {transitions}");
    Ok(())
}
