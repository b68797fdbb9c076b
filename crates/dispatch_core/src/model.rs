//! Fleet, request, and assignment types shared by every dispatch component.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::matching::RankedCandidate;
use crate::pricing::FareBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AmbulanceId(pub u64);

impl fmt::Display for AmbulanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AMB-{}", self.0)
    }
}

/// Request identity; the assignment for a request shares it (1:1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REQ-{}", self.0)
    }
}

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(self) -> DispatchResult<Self> {
        let in_range = self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng);
        if in_range {
            Ok(self)
        } else {
            Err(DispatchError::InvalidLocation {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

/// Capability level of an ambulance crew and kit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EquipmentTier {
    Basic,
    Intermediate,
    Advanced,
    CriticalCare,
}

impl EquipmentTier {
    pub const ALL: [EquipmentTier; 4] = [
        EquipmentTier::Basic,
        EquipmentTier::Intermediate,
        EquipmentTier::Advanced,
        EquipmentTier::CriticalCare,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            EquipmentTier::Basic => 0,
            EquipmentTier::Intermediate => 1,
            EquipmentTier::Advanced => 2,
            EquipmentTier::CriticalCare => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    Defibrillator,
    Ecg,
    Ventilator,
    Oxygen,
    Stretcher,
    FirstAid,
    CardiacMonitor,
    Suction,
}

/// Declared severity: 1 = critical .. 4 = low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Parse the numeric level used by intake forms. Out-of-range levels clamp.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 | 1 => Priority::Critical,
            2 => Priority::High,
            3 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn level(self) -> u8 {
        self.index() as u8 + 1
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideType {
    Emergency,
    Scheduled,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    Insurance,
}

/// An ambulance and its crew. Never deleted; deactivated by going offline.
///
/// `available == false` iff `current_assignment.is_some()` once registered;
/// only the fleet's reserve/release pair mutates that pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambulance {
    pub id: AmbulanceId,
    pub location: GeoPoint,
    pub equipment: BTreeSet<Equipment>,
    pub tier: EquipmentTier,
    /// 0.0 ..= 5.0
    pub rating: f64,
    /// 0.0 ..= 100.0
    pub fuel_level: f64,
    pub online: bool,
    pub available: bool,
    pub current_assignment: Option<RequestId>,
}

impl Ambulance {
    pub fn new(id: AmbulanceId, location: GeoPoint, tier: EquipmentTier) -> Self {
        Self {
            id,
            location,
            equipment: BTreeSet::new(),
            tier,
            rating: 5.0,
            fuel_level: 100.0,
            online: true,
            available: true,
            current_assignment: None,
        }
    }

    pub fn with_equipment(mut self, items: impl IntoIterator<Item = Equipment>) -> Self {
        self.equipment.extend(items);
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_fuel_level(mut self, fuel_level: f64) -> Self {
        self.fuel_level = fuel_level;
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Eligible for a new assignment.
    pub fn is_dispatchable(&self) -> bool {
        self.online && self.available && self.current_assignment.is_none()
    }
}

/// One entry of the location feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub ambulance_id: AmbulanceId,
    pub location: GeoPoint,
    pub online: bool,
    pub available: bool,
    pub fuel_level: f64,
}

/// Inbound transport request. Immutable after intake; status lives on the assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRequest {
    pub id: RequestId,
    pub customer_contact: String,
    pub pickup: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub priority: Priority,
    pub emergency_type: String,
    pub symptoms: Vec<String>,
    pub ride_type: RideType,
    pub payment_method: PaymentMethod,
    /// Stamped by the coordinator at intake.
    pub created_at_ms: u64,
    /// End of the acceptance window; stamped at intake.
    pub expires_at_ms: u64,
}

impl EmergencyRequest {
    pub fn new(
        id: RequestId,
        customer_contact: impl Into<String>,
        pickup: GeoPoint,
        priority: Priority,
        emergency_type: impl Into<String>,
    ) -> Self {
        Self {
            id,
            customer_contact: customer_contact.into(),
            pickup,
            destination: None,
            priority,
            emergency_type: emergency_type.into(),
            symptoms: Vec::new(),
            ride_type: RideType::Emergency,
            payment_method: PaymentMethod::Cash,
            created_at_ms: 0,
            expires_at_ms: 0,
        }
    }

    pub fn with_destination(mut self, destination: GeoPoint) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_symptoms<S: Into<String>>(mut self, symptoms: impl IntoIterator<Item = S>) -> Self {
        self.symptoms.extend(symptoms.into_iter().map(Into::into));
        self
    }

    pub fn with_ride_type(mut self, ride_type: RideType) -> Self {
        self.ride_type = ride_type;
        self
    }

    pub fn with_payment_method(mut self, payment_method: PaymentMethod) -> Self {
        self.payment_method = payment_method;
        self
    }

    /// Whether the acceptance window has closed at `now_ms`. Unstamped requests never lapse.
    pub fn acceptance_lapsed(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }

    /// Equipment hinted at by the emergency type and symptom keywords.
    pub fn required_equipment(&self) -> BTreeSet<Equipment> {
        required_equipment_for(&self.emergency_type, &self.symptoms)
    }
}

const CARDIAC_KEYWORDS: &[&str] = &[
    "cardiac",
    "heart",
    "chest pain",
    "palpitation",
    "palpitations",
];
const RESPIRATORY_KEYWORDS: &[&str] = &[
    "respiratory",
    "breath",
    "breathing",
    "breathless",
    "breathlessness",
    "asthma",
    "asthmatic",
    "choking",
    "copd",
];
const TRAUMA_KEYWORDS: &[&str] = &[
    "trauma",
    "accident",
    "fracture",
    "fractured",
    "injury",
    "injuries",
    "injured",
    "bleeding",
    "fall",
    "fell",
];

/// Keyword match over emergency type and symptoms (case-insensitive, whole words).
///
/// Multi-word keywords must appear as consecutive words, so "respiratory arrest" does not
/// read as cardiac and "rainfall" does not read as a fall.
pub fn required_equipment_for(emergency_type: &str, symptoms: &[String]) -> BTreeSet<Equipment> {
    let mut words = tokenize(emergency_type);
    for symptom in symptoms {
        // Keep phrases from spanning two separate symptoms.
        words.push(String::new());
        words.extend(tokenize(symptom));
    }
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| contains_phrase(&words, k));

    let mut required = BTreeSet::new();
    if mentions(CARDIAC_KEYWORDS) {
        required.extend([Equipment::Defibrillator, Equipment::Ecg]);
    }
    if mentions(RESPIRATORY_KEYWORDS) {
        required.extend([Equipment::Ventilator, Equipment::Oxygen]);
    }
    if mentions(TRAUMA_KEYWORDS) {
        required.extend([Equipment::Stretcher, Equipment::FirstAid]);
    }
    required
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    !needle.is_empty()
        && words
            .windows(needle.len())
            .any(|window| window.iter().zip(&needle).all(|(word, k)| word == k))
}

/// Assignment lifecycle. Transitions only move forward; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    SearchingDrivers,
    DriverAccepted,
    OtpGenerated,
    /// Ride started.
    OtpVerified,
    Completed,
    NoDriversAvailable,
    TimeoutNoAcceptance,
    Cancelled,
}

impl AssignmentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AssignmentState::Completed
                | AssignmentState::NoDriversAvailable
                | AssignmentState::TimeoutNoAcceptance
                | AssignmentState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: AssignmentState) -> bool {
        use AssignmentState::*;
        matches!(
            (self, next),
            (SearchingDrivers, DriverAccepted)
                | (SearchingDrivers, TimeoutNoAcceptance)
                | (SearchingDrivers, NoDriversAvailable)
                | (DriverAccepted, OtpGenerated)
                | (OtpGenerated, OtpVerified)
                | (OtpVerified, Completed)
        ) || (next == Cancelled && !self.is_terminal())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentState::SearchingDrivers => "searching_drivers",
            AssignmentState::DriverAccepted => "driver_accepted",
            AssignmentState::OtpGenerated => "otp_generated",
            AssignmentState::OtpVerified => "otp_verified",
            AssignmentState::Completed => "completed",
            AssignmentState::NoDriversAvailable => "no_drivers_available",
            AssignmentState::TimeoutNoAcceptance => "timeout_no_acceptance",
            AssignmentState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the assignment reaches a driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchFlow {
    /// Offered to the shortlist; the first driver to accept wins.
    #[default]
    Broadcast,
    /// Bound straight to the best candidate; never offered to drivers.
    Batch,
}

/// Timestamp (ms) of each transition taken so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTimes {
    pub created_at: u64,
    pub accepted_at: Option<u64>,
    pub otp_generated_at: Option<u64>,
    pub otp_verified_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub closed_at: Option<u64>,
}

/// Reference to the active one-time code; the code itself stays in the OTP store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpReference {
    pub generated_at_ms: u64,
    pub expires_at_ms: u64,
    pub verified: bool,
}

/// The in-flight dispatch of one request. Owned by the assignment registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: RequestId,
    pub request: EmergencyRequest,
    pub state: AssignmentState,
    #[serde(default)]
    pub flow: DispatchFlow,
    pub ambulance: Option<AmbulanceId>,
    /// Ranked shortlist at creation, kept for audit and fallback.
    pub candidates: Vec<RankedCandidate>,
    pub otp: Option<OtpReference>,
    pub fare_estimate: FareBreakdown,
    pub fare_paid: Option<f64>,
    pub payment_confirmed: bool,
    pub expected_arrival_ms: Option<u64>,
    pub times: TransitionTimes,
}

impl Assignment {
    /// Start in `searching_drivers`, or directly in `no_drivers_available` for an empty shortlist.
    pub fn open(
        request: EmergencyRequest,
        candidates: Vec<RankedCandidate>,
        fare_estimate: FareBreakdown,
        now_ms: u64,
    ) -> Self {
        let state = if candidates.is_empty() {
            AssignmentState::NoDriversAvailable
        } else {
            AssignmentState::SearchingDrivers
        };
        let mut times = TransitionTimes {
            created_at: now_ms,
            ..Default::default()
        };
        if state.is_terminal() {
            times.closed_at = Some(now_ms);
        }
        Self {
            id: request.id,
            request,
            state,
            flow: DispatchFlow::Broadcast,
            ambulance: None,
            candidates,
            otp: None,
            fare_estimate,
            fare_paid: None,
            payment_confirmed: false,
            expected_arrival_ms: None,
            times,
        }
    }

    pub fn with_flow(mut self, flow: DispatchFlow) -> Self {
        self.flow = flow;
        self
    }

    /// Whether drivers may claim this assignment by accepting an offer.
    pub fn is_offered(&self) -> bool {
        self.flow == DispatchFlow::Broadcast
    }

    /// Move to `next`, stamping the transition time. Returns the previous state.
    pub fn advance(
        &mut self,
        next: AssignmentState,
        operation: &'static str,
        now_ms: u64,
    ) -> DispatchResult<AssignmentState> {
        if !self.state.can_transition_to(next) {
            return Err(self.invalid(operation));
        }
        let previous = self.state;
        self.state = next;
        match next {
            AssignmentState::DriverAccepted => self.times.accepted_at = Some(now_ms),
            AssignmentState::OtpGenerated => self.times.otp_generated_at = Some(now_ms),
            AssignmentState::OtpVerified => self.times.otp_verified_at = Some(now_ms),
            AssignmentState::Completed => self.times.completed_at = Some(now_ms),
            _ => {}
        }
        if next.is_terminal() {
            self.times.closed_at = Some(now_ms);
        }
        Ok(previous)
    }

    /// Guard error for `operation` attempted in the current state.
    pub fn invalid(&self, operation: &'static str) -> DispatchError {
        DispatchError::InvalidState {
            request_id: self.id,
            operation,
            state: self.state,
        }
    }

    pub fn is_candidate(&self, ambulance_id: AmbulanceId) -> bool {
        self.candidates.iter().any(|c| c.ambulance_id == ambulance_id)
    }
}
