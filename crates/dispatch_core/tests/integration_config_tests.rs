mod support;

use std::io::Write as _;

use dispatch_core::config::DispatchConfig;
use dispatch_core::error::DispatchError;
use dispatch_core::model::RequestId;
use support::entities::{AmbulanceBuilder, RequestBuilder};
use support::harness::TestDispatchBuilder;

const TIGHT_CONFIG: &str = r#"
archive_capacity = 64
otp_seed = 9

[matching]
broadcast_radius_km = 2.5
shortlist_size = 1

[timeouts]
acceptance_window_secs = 20

[pricing]
emergency_base_fare = 2000.0
"#;

fn write_config(name: &str, content: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("{name}-{}.toml", std::process::id()));
    let mut file = std::fs::File::create(&path).expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    path
}

#[test]
fn file_config_drives_radius_shortlist_and_fare() {
    let path = write_config("dispatch-tight", TIGHT_CONFIG);
    let config = DispatchConfig::from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(config.timeouts.acceptance_window_secs, 20);
    assert_eq!(config.timeouts.otp_ttl_secs, 300);

    let h = TestDispatchBuilder::new()
        .with_config(config)
        .with_ambulance(AmbulanceBuilder::new(1).km_north(1.0).build())
        .with_ambulance(AmbulanceBuilder::new(2).km_north(2.0).build())
        .with_ambulance(AmbulanceBuilder::new(3).km_north(4.0).build())
        .build();
    let receipt = h
        .coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();
    assert_eq!(receipt.candidate_count, 1);
    assert_eq!(receipt.fare_estimate.total, 3000.0);
    let status = h.coordinator.get_status(RequestId(1)).unwrap();
    assert_eq!(
        status.request.expires_at_ms - status.request.created_at_ms,
        20_000
    );
}

#[test]
fn missing_file_is_a_config_error() {
    let path = std::env::temp_dir().join("dispatch-does-not-exist.toml");
    assert!(matches!(
        DispatchConfig::from_file(path),
        Err(DispatchError::Config(_))
    ));
}

#[test]
fn invalid_values_are_rejected_on_load() {
    for bad in [
        "[matching]\nbroadcast_radius_km = -1.0\n",
        "[matching]\nshortlist_size = 0\n",
        "[timeouts]\notp_max_attempts = 0\n",
        "[timeouts]\navg_response_speed_kmh = 0.0\n",
        "archive_capacity = 0\n",
    ] {
        assert!(
            matches!(
                DispatchConfig::from_toml_str(bad),
                Err(DispatchError::Config(_))
            ),
            "accepted: {bad}"
        );
    }
}

#[test]
fn defaults_round_trip_through_toml() {
    let text = toml::to_string(&DispatchConfig::default()).expect("serialize defaults");
    assert_eq!(
        DispatchConfig::from_toml_str(&text).unwrap(),
        DispatchConfig::default()
    );
}
