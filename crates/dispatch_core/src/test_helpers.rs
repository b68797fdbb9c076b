//! Test helpers for common fleet and request setup.
//!
//! Every fixture sits around Connaught Place, New Delhi, so distances in tests read as
//! plain kilometres north of one origin.

use std::f64::consts::PI;
use std::sync::{Arc, OnceLock};

use tokio::runtime::{Builder, Handle, Runtime};

use crate::clock::ManualClock;
use crate::config::DispatchConfig;
use crate::model::{
    Ambulance, AmbulanceId, EmergencyRequest, EquipmentTier, GeoPoint, Priority, RequestId,
};
use crate::spatial::EARTH_RADIUS_KM;

/// Fixed start time for manual clocks (2024-01-01T00:00:00Z).
pub const TEST_EPOCH_MS: u64 = 1_704_067_200_000;

/// The shared origin of all test geography.
pub fn connaught_place() -> GeoPoint {
    GeoPoint::new(28.6315, 77.2167)
}

/// A point `km` due north of `origin` (exact along a meridian).
pub fn point_north_of(origin: GeoPoint, km: f64) -> GeoPoint {
    let km_per_degree = EARTH_RADIUS_KM * PI / 180.0;
    GeoPoint::new(origin.lat + km / km_per_degree, origin.lng)
}

/// Online, available Advanced unit with default rating and fuel.
pub fn test_ambulance(id: u64, location: GeoPoint) -> Ambulance {
    Ambulance::new(AmbulanceId(id), location, EquipmentTier::Advanced)
}

/// Critical cardiac call at Connaught Place.
pub fn test_request(id: u64) -> EmergencyRequest {
    EmergencyRequest::new(
        RequestId(id),
        format!("+91-90000{id:05}"),
        connaught_place(),
        Priority::Critical,
        "cardiac",
    )
}

/// Manual clock starting at [`TEST_EPOCH_MS`].
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(TEST_EPOCH_MS))
}

/// Default configuration with a fixed OTP seed so codes are reproducible.
pub fn test_config() -> DispatchConfig {
    DispatchConfig::default().with_otp_seed(42)
}

/// Handle to a process-wide background runtime for tests that run on plain threads.
///
/// Acceptance timers spawned here keep real time. Tests that need to step timers should
/// run under `#[tokio::test(start_paused = true)]` and use that runtime's handle instead.
///
/// # Panics
///
/// Panics if the runtime cannot be started.
pub fn test_runtime() -> Handle {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("dispatch-test-timers")
                .enable_time()
                .build()
                .expect("background test runtime")
        })
        .handle()
        .clone()
}
