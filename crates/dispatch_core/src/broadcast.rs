//! Broadcast of a request to its shortlist, acceptance resolution, and the acceptance timer.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{AmbulanceId, Assignment, AssignmentState, RequestId};
use crate::notify::{deliver, DispatchEvent, NotificationPort};
use crate::registry::{AssignmentRegistry, ClaimMode, ClaimOutcome, RejectReason};
use crate::spatial::GeoIndex;

/// Fans a request out to its candidates and arbitrates who gets it.
///
/// Cheap to clone; timer tasks hold their own clone. Timers run on the runtime handed in at
/// construction, so callers on plain threads still get their acceptance window enforced.
#[derive(Clone)]
pub struct BroadcastArbiter {
    runtime: Handle,
    registry: Arc<AssignmentRegistry>,
    fleet: Arc<GeoIndex>,
    notifier: Arc<dyn NotificationPort>,
    clock: Arc<dyn Clock>,
    acceptance_window: Duration,
    avg_speed_kmh: f64,
    timers: Arc<Mutex<HashMap<RequestId, AbortHandle>>>,
}

impl fmt::Debug for BroadcastArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastArbiter")
            .field("acceptance_window", &self.acceptance_window)
            .field("pending_timers", &self.pending_timers())
            .finish_non_exhaustive()
    }
}

impl BroadcastArbiter {
    pub fn new(
        runtime: Handle,
        registry: Arc<AssignmentRegistry>,
        fleet: Arc<GeoIndex>,
        notifier: Arc<dyn NotificationPort>,
        clock: Arc<dyn Clock>,
        acceptance_window: Duration,
        avg_speed_kmh: f64,
    ) -> Self {
        Self {
            runtime,
            registry,
            fleet,
            notifier,
            clock,
            acceptance_window,
            avg_speed_kmh,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Offer the request to every shortlisted driver and start the acceptance window.
    ///
    /// Returns how many offers were handed to the notifier. Never waits on drivers.
    pub fn broadcast(&self, assignment: &Assignment) -> usize {
        let request = &assignment.request;
        let sent = assignment
            .candidates
            .iter()
            .filter(|c| {
                deliver(
                    self.notifier.as_ref(),
                    DispatchEvent::RideRequested {
                        request_id: assignment.id,
                        ambulance_id: c.ambulance_id,
                        pickup: request.pickup,
                        priority: request.priority,
                        distance_km: c.distance_km,
                    },
                )
            })
            .count();
        info!(
            request_id = %assignment.id,
            candidates = assignment.candidates.len(),
            sent,
            "request broadcast"
        );
        self.arm_timer(assignment.id);
        sent
    }

    fn arm_timer(&self, request_id: RequestId) {
        let arbiter = self.clone();
        let window = self.acceptance_window;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(err) = arbiter.expire_if_unanswered(request_id) {
                warn!(request_id = %request_id, error = %err, "acceptance timer failed");
            }
        });
        match self.timers.lock() {
            Ok(mut timers) => {
                if let Some(previous) = timers.insert(request_id, task.abort_handle()) {
                    previous.abort();
                }
            }
            Err(_) => warn!(request_id = %request_id, "timer table poisoned; timer not tracked"),
        }
    }

    /// Close the request as `timeout_no_acceptance` if nobody has accepted yet.
    ///
    /// Safe to call any number of times; anything but `searching_drivers` is left alone.
    pub fn expire_if_unanswered(&self, request_id: RequestId) -> DispatchResult<bool> {
        self.forget_timer(request_id);
        let now_ms = self.clock.now_ms();
        let expired = self.registry.with_assignment(request_id, |assignment| {
            if assignment.state != AssignmentState::SearchingDrivers {
                return Ok(false);
            }
            assignment.advance(AssignmentState::TimeoutNoAcceptance, "expire", now_ms)?;
            Ok(true)
        });
        let expired = match expired {
            Err(DispatchError::UnknownRequest(_)) => false,
            other => other?,
        };
        if expired {
            info!(request_id = %request_id, "acceptance window closed without a driver");
            deliver(
                self.notifier.as_ref(),
                DispatchEvent::status_changed(
                    request_id,
                    Some(AssignmentState::SearchingDrivers),
                    AssignmentState::TimeoutNoAcceptance,
                    now_ms,
                ),
            );
        } else {
            debug!(request_id = %request_id, "acceptance timer fired after decision");
        }
        Ok(expired)
    }

    /// A shortlisted driver accepts. Exactly one concurrent caller wins.
    pub fn accept(
        &self,
        request_id: RequestId,
        ambulance_id: AmbulanceId,
    ) -> DispatchResult<ClaimOutcome> {
        self.resolve(request_id, ambulance_id, ClaimMode::Broadcast)
    }

    /// Bind any dispatchable ambulance without going through the shortlist.
    pub fn assign(
        &self,
        request_id: RequestId,
        ambulance_id: AmbulanceId,
    ) -> DispatchResult<ClaimOutcome> {
        self.resolve(request_id, ambulance_id, ClaimMode::Direct)
    }

    fn resolve(
        &self,
        request_id: RequestId,
        ambulance_id: AmbulanceId,
        mode: ClaimMode,
    ) -> DispatchResult<ClaimOutcome> {
        let now_ms = self.clock.now_ms();
        let outcome = self.registry.claim(
            request_id,
            ambulance_id,
            &self.fleet,
            mode,
            now_ms,
            self.avg_speed_kmh,
        )?;
        match &outcome {
            ClaimOutcome::Won(assignment) => {
                self.disarm(request_id);
                deliver(
                    self.notifier.as_ref(),
                    DispatchEvent::RideAccepted {
                        request_id,
                        ambulance_id,
                        customer_contact: assignment.request.customer_contact.clone(),
                        expected_arrival_ms: assignment.expected_arrival_ms.unwrap_or(now_ms),
                    },
                );
                deliver(
                    self.notifier.as_ref(),
                    DispatchEvent::status_changed(
                        request_id,
                        Some(AssignmentState::SearchingDrivers),
                        AssignmentState::DriverAccepted,
                        now_ms,
                    ),
                );
            }
            ClaimOutcome::Expired => {
                self.disarm(request_id);
                debug!(
                    request_id = %request_id,
                    ambulance_id = %ambulance_id,
                    "claim arrived after the window"
                );
                deliver(
                    self.notifier.as_ref(),
                    DispatchEvent::status_changed(
                        request_id,
                        Some(AssignmentState::SearchingDrivers),
                        AssignmentState::TimeoutNoAcceptance,
                        now_ms,
                    ),
                );
            }
            ClaimOutcome::Rejected(RejectReason::RideAlreadyAssigned) => {
                info!(request_id = %request_id, ambulance_id = %ambulance_id, "race lost");
            }
            ClaimOutcome::Rejected(reason) => {
                debug!(
                    request_id = %request_id,
                    ambulance_id = %ambulance_id,
                    reason = ?reason,
                    "acceptance rejected"
                );
            }
        }
        Ok(outcome)
    }

    /// Stop the acceptance timer for a request, if one is pending.
    pub fn disarm(&self, request_id: RequestId) -> bool {
        match self.forget_timer(request_id) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    fn forget_timer(&self, request_id: RequestId) -> Option<AbortHandle> {
        self.timers
            .lock()
            .ok()
            .and_then(|mut timers| timers.remove(&request_id))
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }
}
