pub mod broadcast;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod matching;
pub mod model;
pub mod notify;
pub mod otp;
pub mod pricing;
pub mod registry;
pub mod spatial;
pub mod supervisor;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use coordinator::{
    AcceptOutcome, CancelReceipt, CompletionReceipt, CoordinatorBuilder, DispatchCoordinator,
    DispatchReceipt, OtpReceipt, RideRequestReceipt, VerifyReceipt,
};
pub use error::{DispatchError, DispatchResult};
