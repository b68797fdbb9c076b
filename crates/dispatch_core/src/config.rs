//! Dispatch configuration: search radii, timers, pricing, archive size.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::ONE_SEC_MS;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{EquipmentTier, RideType};

/// Candidate search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Radius (km) for the broadcast flow.
    pub broadcast_radius_km: f64,
    /// Radius (km) for the direct/batch dispatch flow.
    pub batch_radius_km: f64,
    /// How many ranked candidates are kept.
    pub shortlist_size: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            broadcast_radius_km: 10.0,
            batch_radius_km: 50.0,
            shortlist_size: 3,
        }
    }
}

/// Timer and supervision windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Window for drivers to accept a broadcast (seconds).
    pub acceptance_window_secs: u64,
    /// One-time code validity (seconds).
    pub otp_ttl_secs: u64,
    /// Wrong codes tolerated per token.
    pub otp_max_attempts: u32,
    /// Supervisor scan interval (seconds).
    pub supervisor_interval_secs: u64,
    /// Slack past the expected arrival before an assignment counts as overdue (seconds).
    pub overdue_grace_secs: u64,
    /// Speed used to turn pickup distance into an expected arrival (km/h).
    pub avg_response_speed_kmh: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            acceptance_window_secs: 15,
            otp_ttl_secs: 5 * 60,
            otp_max_attempts: 5,
            supervisor_interval_secs: 5 * 60,
            overdue_grace_secs: 10 * 60,
            avg_response_speed_kmh: 40.0,
        }
    }
}

impl TimeoutConfig {
    pub fn acceptance_window(&self) -> Duration {
        Duration::from_secs(self.acceptance_window_secs)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_secs)
    }

    pub fn otp_ttl_ms(&self) -> u64 {
        self.otp_ttl_secs * ONE_SEC_MS
    }

    pub fn overdue_grace_ms(&self) -> u64 {
        self.overdue_grace_secs * ONE_SEC_MS
    }
}

/// Fare parameters. Amounts are in the local currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub emergency_base_fare: f64,
    pub scheduled_base_fare: f64,
    pub regular_base_fare: f64,
    pub emergency_multiplier: f64,
    pub scheduled_multiplier: f64,
    pub regular_multiplier: f64,
    /// Per-km rate for the direct dispatch flow.
    pub per_km_rate: f64,
    /// Surcharge by tier, indexed BASIC..CRITICAL_CARE.
    pub equipment_surcharge: [f64; 4],
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            emergency_base_fare: 1500.0,
            scheduled_base_fare: 1000.0,
            regular_base_fare: 800.0,
            emergency_multiplier: 1.5,
            scheduled_multiplier: 1.0,
            regular_multiplier: 1.2,
            per_km_rate: 15.0,
            equipment_surcharge: [0.0, 200.0, 500.0, 1000.0],
        }
    }
}

impl PricingConfig {
    pub fn base_fare(&self, ride_type: RideType) -> f64 {
        match ride_type {
            RideType::Emergency => self.emergency_base_fare,
            RideType::Scheduled => self.scheduled_base_fare,
            RideType::Regular => self.regular_base_fare,
        }
    }

    pub fn priority_multiplier(&self, ride_type: RideType) -> f64 {
        match ride_type {
            RideType::Emergency => self.emergency_multiplier,
            RideType::Scheduled => self.scheduled_multiplier,
            RideType::Regular => self.regular_multiplier,
        }
    }

    pub fn surcharge(&self, tier: EquipmentTier) -> f64 {
        self.equipment_surcharge[tier.index()]
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub matching: MatchingConfig,
    pub timeouts: TimeoutConfig,
    pub pricing: PricingConfig,
    /// Terminal assignments kept for status queries.
    pub archive_capacity: usize,
    /// Seed for OTP generation; `None` draws from OS entropy.
    pub otp_seed: Option<u64>,
}

const DEFAULT_ARCHIVE_CAPACITY: usize = 10_000;

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            timeouts: TimeoutConfig::default(),
            pricing: PricingConfig::default(),
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
            otp_seed: None,
        }
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> DispatchResult<Self> {
        let config: DispatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> DispatchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        let m = &self.matching;
        let t = &self.timeouts;
        let problem = if !positive(m.broadcast_radius_km) || !positive(m.batch_radius_km) {
            Some("search radii must be positive")
        } else if m.shortlist_size == 0 {
            Some("shortlist_size must be at least 1")
        } else if t.acceptance_window_secs == 0 || t.otp_ttl_secs == 0 {
            Some("acceptance and OTP windows must be non-zero")
        } else if t.supervisor_interval_secs == 0 {
            Some("supervisor_interval_secs must be non-zero")
        } else if t.otp_max_attempts == 0 {
            Some("otp_max_attempts must be at least 1")
        } else if !positive(t.avg_response_speed_kmh) {
            Some("avg_response_speed_kmh must be positive")
        } else if self.archive_capacity == 0 {
            Some("archive_capacity must be at least 1")
        } else {
            None
        };
        match problem {
            Some(msg) => Err(DispatchError::Config(msg.to_string())),
            None => Ok(()),
        }
    }

    pub fn with_broadcast_radius_km(mut self, radius_km: f64) -> Self {
        self.matching.broadcast_radius_km = radius_km;
        self
    }

    pub fn with_acceptance_window_secs(mut self, secs: u64) -> Self {
        self.timeouts.acceptance_window_secs = secs;
        self
    }

    pub fn with_otp_ttl_secs(mut self, secs: u64) -> Self {
        self.timeouts.otp_ttl_secs = secs;
        self
    }

    pub fn with_otp_seed(mut self, seed: u64) -> Self {
        self.otp_seed = Some(seed);
        self
    }

    pub fn with_archive_capacity(mut self, capacity: usize) -> Self {
        self.archive_capacity = capacity;
        self
    }
}
