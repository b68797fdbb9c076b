//! Error taxonomy for the dispatch core.
//!
//! Transition-guard violations come back as typed `Err` values; only
//! `StoreUnavailable` signals an infrastructure failure the caller cannot
//! recover from locally.

use thiserror::Error;

use crate::model::{AmbulanceId, AssignmentState, RequestId};

/// Dispatch core error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// No online, available ambulance inside the search radius.
    #[error("no ambulances available near request {0}")]
    NoCandidatesFound(RequestId),

    /// Another driver already won the request.
    #[error("ride already assigned: request {0}")]
    RaceLost(RequestId),

    /// The acceptance window closed without a winner.
    #[error("request {0} timed out with no acceptance")]
    TimeoutNoAcceptance(RequestId),

    /// Operation attempted out of sequence.
    #[error("cannot {operation} request {request_id} in state {state}")]
    InvalidState {
        request_id: RequestId,
        operation: &'static str,
        state: AssignmentState,
    },

    /// Submitted code does not match the active token.
    #[error("invalid OTP for request {0}")]
    InvalidOtp(RequestId),

    /// The active token is past its expiry.
    #[error("OTP for request {0} has expired")]
    OtpExpired(RequestId),

    /// The active token was already consumed.
    #[error("OTP for request {0} was already used")]
    OtpAlreadyUsed(RequestId),

    /// Too many wrong codes were submitted against the active token.
    #[error("OTP attempts exhausted for request {request_id} ({attempts} attempts)")]
    OtpAttemptsExceeded { request_id: RequestId, attempts: u32 },

    /// The submitting driver is not the one bound to the assignment.
    #[error("ambulance {ambulance_id} is not assigned to request {request_id}")]
    NotBoundDriver {
        request_id: RequestId,
        ambulance_id: AmbulanceId,
    },

    #[error("unknown request {0}")]
    UnknownRequest(RequestId),

    #[error("unknown ambulance {0}")]
    UnknownAmbulance(AmbulanceId),

    #[error("request {0} already exists")]
    DuplicateRequest(RequestId),

    #[error("ambulance {0} is already registered")]
    DuplicateAmbulance(AmbulanceId),

    /// Ambulance is offline or bound to another assignment.
    #[error("ambulance {0} is not available")]
    AmbulanceUnavailable(AmbulanceId),

    #[error("invalid location: lat={lat}, lng={lng}")]
    InvalidLocation { lat: f64, lng: f64 },

    #[error("configuration error: {0}")]
    Config(String),

    /// Backing store cannot be used (poisoned lock, lost connection).
    #[error("assignment store unavailable: {0}")]
    StoreUnavailable(String),
}

impl DispatchError {
    /// Whether the same caller may simply try again (new request, new code).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::TimeoutNoAcceptance(_)
                | DispatchError::InvalidOtp(_)
                | DispatchError::OtpExpired(_)
        )
    }

    /// Infrastructure failures are the only errors that should abort a caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::StoreUnavailable(_))
    }
}

impl From<toml::de::Error> for DispatchError {
    fn from(err: toml::de::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

/// Result alias used across the crate.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Map a poisoned lock into a store failure.
pub(crate) fn poisoned<T>(what: &'static str) -> impl FnOnce(T) -> DispatchError {
    move |_| DispatchError::StoreUnavailable(format!("{what} lock poisoned"))
}
