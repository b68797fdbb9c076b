//! Outbound notifications: driver offers, customer updates, status changes, alerts.
//!
//! Consumers subscribe through a [`NotificationPort`]. Delivery is fire-and-forget;
//! a failed delivery is logged and never fails the dispatch operation that caused it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{AmbulanceId, AssignmentState, GeoPoint, Priority, RequestId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Offer sent to one shortlisted driver.
    RideRequested {
        request_id: RequestId,
        ambulance_id: AmbulanceId,
        pickup: GeoPoint,
        priority: Priority,
        distance_km: f64,
    },
    /// Customer-facing: a driver is on the way.
    RideAccepted {
        request_id: RequestId,
        ambulance_id: AmbulanceId,
        customer_contact: String,
        expected_arrival_ms: u64,
    },
    /// Customer-facing: code to read out to the driver at pickup.
    OtpIssued {
        request_id: RequestId,
        customer_contact: String,
        code: String,
        expires_at_ms: u64,
    },
    StatusChanged {
        request_id: RequestId,
        from: Option<AssignmentState>,
        to: AssignmentState,
        at_ms: u64,
    },
    /// Escalation for operations; not a state change.
    OverdueAlert {
        request_id: RequestId,
        ambulance_id: Option<AmbulanceId>,
        state: AssignmentState,
        expected_arrival_ms: u64,
        overdue_by_ms: u64,
    },
}

impl DispatchEvent {
    pub fn status_changed(
        request_id: RequestId,
        from: Option<AssignmentState>,
        to: AssignmentState,
        at_ms: u64,
    ) -> Self {
        DispatchEvent::StatusChanged {
            request_id,
            from,
            to,
            at_ms,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            DispatchEvent::RideRequested { request_id, .. }
            | DispatchEvent::RideAccepted { request_id, .. }
            | DispatchEvent::OtpIssued { request_id, .. }
            | DispatchEvent::StatusChanged { request_id, .. }
            | DispatchEvent::OverdueAlert { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    ChannelClosed,
    #[error("notification gateway failed: {0}")]
    Gateway(String),
}

/// Sink for dispatch events. Implementations must not block.
pub trait NotificationPort: Send + Sync {
    fn publish(&self, event: DispatchEvent) -> Result<(), NotifyError>;
}

/// Publish and swallow failures.
pub(crate) fn deliver(port: &dyn NotificationPort, event: DispatchEvent) -> bool {
    let request_id = event.request_id();
    match port.publish(event) {
        Ok(()) => true,
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "notification dropped");
            false
        }
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationPort for ChannelNotifier {
    fn publish(&self, event: DispatchEvent) -> Result<(), NotifyError> {
        self.tx.send(event).map_err(|_| NotifyError::ChannelClosed)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl NotificationPort for NoopNotifier {
    fn publish(&self, _event: DispatchEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}
